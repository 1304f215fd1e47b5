use std::{path::Path, sync::Arc};

use app_controller::{
    api::{self, AppState},
    auth::{self, JwksVerifier},
    cli::{Cli, Command, MigrateArguments, RunArguments},
    client::{self, Client},
    config::{self, Config},
    namespace::NamespaceProvisioner,
    quota::QuotaGuard,
    registry::RegistryCredentialProvisioner,
    store::{self, TenantStore},
    tenant::TenantDirectory,
    workload::{WorkloadManager, WorkloadSettings},
};
use app_controller_telemetry::tracing::{self as telemetry, TelemetryOptions, Tracing};
use clap::Parser;
use snafu::{ResultExt, Snafu};
use tokio::{net::TcpListener, runtime::Runtime};
use tracing::info;

const SERVICE_NAME: &str = "app-controller";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitTracing { source: telemetry::Error },

    #[snafu(display("failed to create the async runtime"))]
    CreateRuntime { source: std::io::Error },

    #[snafu(display("failed to load configuration"))]
    LoadConfig { source: config::Error },

    #[snafu(display("failed to open the tenant store"))]
    OpenStore { source: store::Error },

    #[snafu(display("failed to load token verification keys"))]
    LoadKeys { source: auth::KeySetError },

    #[snafu(display("failed to create cluster client"))]
    CreateClient { source: client::Error },

    #[snafu(display("failed to bind to {address}"))]
    Bind {
        source: std::io::Error,
        address: std::net::SocketAddr,
    },

    #[snafu(display("failed to serve the API"))]
    Serve { source: std::io::Error },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(RunArguments { config, telemetry }) => {
            let _tracing_guard = init_tracing(telemetry)?;
            runtime()?.block_on(run(&config))
        }
        Command::Migrate(MigrateArguments { config, telemetry }) => {
            let _tracing_guard = init_tracing(telemetry)?;
            runtime()?.block_on(migrate(&config))
        }
        Command::Version => {
            println!("{SERVICE_NAME} {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(options: TelemetryOptions) -> Result<Tracing, Error> {
    Tracing::pre_configured(SERVICE_NAME, options)
        .init()
        .context(InitTracingSnafu)
}

fn runtime() -> Result<Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(CreateRuntimeSnafu)
}

async fn open_store(config: &Config) -> Result<Arc<dyn TenantStore>, Error> {
    store::open(&config.db).await.context(OpenStoreSnafu)
}

async fn migrate(config_file: &Path) -> Result<(), Error> {
    let config = Config::load(config_file).context(LoadConfigSnafu)?;
    open_store(&config).await?;

    info!("tenant store is up to date");
    Ok(())
}

async fn run(config_file: &Path) -> Result<(), Error> {
    let config = Config::load(config_file).context(LoadConfigSnafu)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_file.display(),
        "starting app-controller"
    );

    let store = open_store(&config).await?;
    let verifier = JwksVerifier::from_file(
        &config.auth.jwks_file,
        config.auth.audience.clone(),
        config.auth.algorithms.clone(),
    )
    .await
    .context(LoadKeysSnafu)?;
    let cluster = Arc::new(
        Client::try_from_kubeconfig(config.kubeconfig.file.as_deref())
            .await
            .context(CreateClientSnafu)?,
    );

    let tenants = TenantDirectory::new(store, NamespaceProvisioner::new(cluster.clone()));
    let workloads = WorkloadManager::new(
        cluster.clone(),
        QuotaGuard::new(cluster.clone(), config.constraints.max_app),
        RegistryCredentialProvisioner::new(cluster),
        WorkloadSettings {
            max_scale: config.constraints.max_scale,
            strict_pull_secrets: config.constraints.strict_pull_secrets,
        },
    );

    let router = api::router(AppState {
        tenants: Arc::new(tenants),
        workloads: Arc::new(workloads),
        verifier: Arc::new(verifier),
        request_timeout: config.server.request_timeout,
    });

    let address = config.server.bind_address;
    let listener = TcpListener::bind(address)
        .await
        .context(BindSnafu { address })?;

    api::serve(listener, router).await.context(ServeSnafu)
}
