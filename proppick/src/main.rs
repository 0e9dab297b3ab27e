use clap::Parser;
use proppick::{
    Application, Config,
    config::{Args, EmailTransportConfig},
    telemetry,
};
use tokio::signal;

#[derive(Debug, Clone, Copy)]
enum Signal {
    Interrupt,
    Terminate,
}

async fn wait_for_signal() -> Signal {
    let interrupt = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => Signal::Interrupt,
        _ = terminate => Signal::Terminate,
    }
}

/// One line per setting an operator is likely to get wrong.
fn describe(config: &Config) -> String {
    let email = match &config.email.transport {
        EmailTransportConfig::Smtp { host, port, .. } => format!("smtp {host}:{port}"),
        EmailTransportConfig::File { path } => format!("files in {path}"),
    };
    let routes: Vec<&str> = config.auth.default_permissions.iter().map(|p| p.route.as_str()).collect();

    [
        format!("listen:              {}", config.bind_address()),
        format!("database:            {}", config.database.url),
        format!("email:               {email}"),
        format!("uploads:             {}", config.uploads.dir.display()),
        format!("default permissions: {}", routes.join(", ")),
        format!("resource mutation:   {:?}", config.auth.resource_mutation),
        format!("bootstrap admin:     {}", config.admin_password.as_ref().map_or("off", |_| config.admin_email.as_str())),
    ]
    .join("\n")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // SMTP TLS and OTLP export both need a process-wide provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.\n{}", describe(&config));
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!(config_file = %args.config, "Loaded configuration\n{}", describe(&config));

    let app = Application::new(config).await?;
    app.serve(async {
        let signal = wait_for_signal().await;
        tracing::info!(?signal, "Shutting down gracefully");
    })
    .await
}
