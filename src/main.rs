use clap::Parser;
use hashi::Options;

#[derive(Debug, Parser)]
#[command(name = "hashi", version, disable_version_flag = true)]
struct Opt {
    /// Accept proofs containing `sorry` and report them as warnings
    #[arg(long)]
    allow_sorry: bool,

    /// Print every declaration of the checked environment
    #[arg(long)]
    list: bool,

    /// Bound the number of rewrites a single `simp` may perform
    #[arg(long, value_name = "N")]
    simp_max_steps: Option<usize>,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opt = Opt::parse();
    let options = Options {
        allow_deferred: opt.allow_sorry,
        simp_max_steps: opt.simp_max_steps,
        ..Options::default()
    };

    let env = hashi::process(options)?;
    if opt.list {
        for decl in env.declarations() {
            println!("{} : {}", decl.name, decl.ty);
        }
    }
    println!("checked {} declarations", env.len());
    Ok(())
}
