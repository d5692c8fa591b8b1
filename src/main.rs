use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taghttp::http::Method;
use taghttp::layers::{Stage, builtin};
use taghttp::routes::{self, FilesRoute};
use taghttp::server::{HttpServer, ServerConfig, ServerError};

#[derive(Parser)]
#[command(name = "taghttp")]
#[command(about = "HTTP/1.1 server with tag-grouped request memory", long_about = None)]
struct Cli {
    /// Verbose request/response logging.
    #[arg(short, long)]
    verbose: bool,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory served by the /files endpoint.
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "taghttp=debug"
    } else {
        "taghttp=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig {
        port: cli.port,
        verbose: cli.verbose,
        directory: cli.directory,
        ..ServerConfig::default()
    };

    let mut server = HttpServer::new(config.clone());

    let router = server.router_mut();
    router.add("/", Method::Get.into(), true, routes::index);
    router.add("/echo", Method::Get.into(), false, routes::echo);
    router.add("/user-agent", Method::Get.into(), false, routes::user_agent);
    router.add("/hello", Method::Get.into(), false, routes::hello);
    if let Some(directory) = &config.directory {
        router.add(
            "/files",
            Method::Get | Method::Post,
            false,
            FilesRoute::new(directory.clone()),
        );
    }

    let pipeline = server.pipeline_mut();
    if cli.verbose {
        pipeline.add(Stage::PreRoute, "request-log", true, builtin::request_log_verbose);
    } else {
        pipeline.add(Stage::PreRoute, "request-log", true, builtin::request_log);
    }
    pipeline.add(Stage::PostRoute, "content-encoding", true, builtin::content_encoding);
    pipeline.add(Stage::PostRoute, "content-length", true, builtin::content_length);
    pipeline.add(Stage::PostRoute, "connection-close", true, builtin::connection_close);
    pipeline.add(
        Stage::PostRoute,
        "request-memory-usage",
        true,
        builtin::request_memory_usage,
    );
    if cli.verbose {
        pipeline.add(Stage::PostRoute, "response-log", true, builtin::response_log_verbose);
    } else {
        pipeline.add(Stage::PostRoute, "response-log", true, builtin::response_log);
    }

    server.bind().await?.run().await
}
