use anyhow::Context;
use clap::Parser;
use load_tester::cli::Cli;
use load_tester::scenario::Experiment;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    load_tester::logging::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config().context("Invalid configuration")?;
    let mut experiment = Experiment::from_config(config).context("Failed to set up experiment")?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let _guard = rt.enter();
    rt.block_on(async {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        experiment.run(&mut out).await.context("Experiment failed")
    })?;
    Ok(())
}
