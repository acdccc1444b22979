use clap::Parser;
use gcodelink::cli::{Cli, Commands, RelayArgs, SendArgs};
use gcodelink::{
    create_session, init_logging, Config, GcodeProgram, JobSender, LineTransport,
    RelayMultiplexer, RelayOutcome, TracingSink,
};
use gcodelink_communication::DuplexLink;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(mut config) => {
            cli.apply(&mut config);
            config
        }
        Err(e) => {
            eprintln!("gcodelink: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging.level, config.logging.json) {
        eprintln!("gcodelink: failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }
    info!("gcodelink {} (built {})", gcodelink::VERSION, gcodelink::BUILD_DATE);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match &cli.command {
            Commands::Send(args) => run_send(args, config).await,
            Commands::Relay(args) => run_relay(args, config).await,
        }
    });

    // A stdin read parked on a blocking thread cannot be cancelled; do not wait for it.
    runtime.shutdown_background();

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Resolves on the next Ctrl-C; never resolves if the handler cannot be installed
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_send(args: &SendArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let program = GcodeProgram::load(&args.file)?;
    info!("Sending {} ({} lines)", args.file.display(), program.len());

    let protocol = config.session.protocol;
    let transport = LineTransport::new(config.connection.endpoint(), protocol.terminator())
        .with_read_timeout(config.connection.read_timeout());
    let mut session = create_session(
        protocol,
        transport,
        TracingSink::shared(),
        config.session.timing(),
    );

    session.open(config.session.initialize).await?;

    let report = JobSender::new()
        .with_wait_idle(config.session.wait_idle_on_finish)
        .run(session.as_mut(), &program, interrupt)
        .await?;

    if report.interrupted {
        info!("Stopped after {} of {} lines", report.lines_sent, program.len());
    }
    Ok(())
}

async fn run_relay(args: &RelayArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let upstream = match config.relay.upstream_endpoint()? {
        Some(endpoint) => {
            info!("Relaying {}", endpoint);
            endpoint.connect().await?
        }
        None => {
            info!("Relaying this process's stdin/stdout");
            DuplexLink::stdio()
        }
    };

    let listen = config.relay.listen_address()?;
    let relay = RelayMultiplexer::bind(&listen, upstream, TracingSink::shared())
        .await?
        .with_chunk_size(config.relay.chunk_size)
        .with_poll_timeout(config.relay.poll_timeout());

    match relay.run(interrupt()).await? {
        RelayOutcome::UpstreamClosed => info!("Upstream closed, relay stopped"),
        RelayOutcome::Interrupted => info!("Relay interrupted"),
    }
    Ok(())
}
