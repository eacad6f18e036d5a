use std::{path::Path, sync::Arc, time::Duration};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use exporter_sidecar::{
    agent::Agent,
    catalog::{CatalogClient, EndpointPool, ServiceDescriptor},
    cli::{Cli, parse_args},
    error::SidecarError,
    exporter::ExporterCommand,
    net,
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = run(args) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run(args: Cli) -> Result<(), SidecarError> {
    let (command, port) =
        ExporterCommand::new(&args.exporter, args.listen_port, &args.args, &args.env)
            .build()?;

    let service = match args.service {
        Some(ref name) if !name.is_empty() => name.clone(),
        _ => binary_name(&command),
    };

    let node = net::hostname()?;
    let address = match args.advertise_ip {
        Some(ip) => ip.to_string(),
        None => net::external_ip()?.to_string(),
    };

    let descriptor = ServiceDescriptor::new(
        service.clone(),
        address,
        port,
        args.tags,
        args.meta.into_iter().collect(),
        args.override_id.as_deref(),
    );

    let pool = EndpointPool::new(&args.consul_cluster)?;
    let catalog = Arc::new(CatalogClient::new(pool, node, args.datacenter)?);

    let mut agent = Agent::new(command, service)
        .with_health_window(Duration::from_secs(args.health_window));

    // Exporters without a resolvable port cannot be addressed by scrapers,
    // so they run unregistered.
    if port != 0 {
        let client = Arc::clone(&catalog);
        let registration = descriptor.clone();
        agent.add_post_start_hook(move || client.register(&registration));

        let client = Arc::clone(&catalog);
        let identity = descriptor.identity().to_string();
        agent.add_pre_stop_hook(move || client.deregister(&identity))?;
    } else {
        info!("No listening port resolved; skipping catalog registration");
    }

    agent.run()
}

/// Basename of the resolved exporter program, used as the default service name.
fn binary_name(command: &std::process::Command) -> String {
    Path::new(command.get_program())
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.get_program().to_string_lossy().into_owned())
}
