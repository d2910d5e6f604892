use clap::Parser;
use facesync::Opts;
use facesync::cli::SubCommandExtend;
use facesync::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Server(config) => config.run(&opts).await,
        SubCommand::Sync(config) => config.run(&opts).await,
        SubCommand::Match(config) => config.run(&opts).await,
        SubCommand::Reset(config) => config.run(&opts).await,
    }
}
