//! Offload demo: computes π on the worker pool and locally, then makes a
//! request-scoped offloaded call.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use offload_runtime::di::UnknownMethod;
use offload_runtime::{
    current_worker, declare_token, Catalog, ModuleDef, OffloadApp, OffloadConfig, PoolConfig,
    Provider, ProviderDef, RequestContext, Token, Value,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "offload-demo", about = "Run DI provider methods on a worker pool")]
struct Cli {
    /// Leibniz series terms used to approximate π.
    #[arg(long, env = "OFFLOAD_DEMO_TERMS", default_value_t = 10_000)]
    terms: i64,

    /// Worker threads (min and max). Defaults to CPU-derived sizing.
    #[arg(long, env = "OFFLOAD_DEMO_THREADS")]
    threads: Option<usize>,

    /// Request identifiers for the request-scoped call.
    #[arg(long = "request", default_values_t = ["r1".to_string(), "r2".to_string()])]
    requests: Vec<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

struct PiService;
declare_token!(PiService);

#[allow(clippy::cast_precision_loss)]
fn leibniz_pi(terms: i64) -> f64 {
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 0..terms.max(0) {
        sum += sign / (2 * k + 1) as f64;
        sign = -sign;
    }
    4.0 * sum
}

#[async_trait]
impl Provider for PiService {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        match method {
            "pi" => {
                let terms = args.first().and_then(Value::as_i64).unwrap_or(10_000);
                Ok(Value::from(leibniz_pi(terms)))
            }
            other => Err(UnknownMethod::new(other).into()),
        }
    }
}

/// Request-scoped view of the current request.
struct RequestInfo {
    request_id: String,
}
declare_token!(RequestInfo);

#[async_trait]
impl Provider for RequestInfo {
    async fn invoke(&self, method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
        match method {
            "id" => Ok(Value::from(self.request_id.as_str())),
            other => Err(UnknownMethod::new(other).into()),
        }
    }
}

struct Greeter {
    info: Arc<RequestInfo>,
}
declare_token!(Greeter);

#[async_trait]
impl Provider for Greeter {
    async fn invoke(&self, method: &str, _args: Vec<Value>) -> anyhow::Result<Value> {
        match method {
            "greet" => {
                let worker =
                    current_worker().map_or_else(|| "main".to_string(), |w| w.id.to_string());
                Ok(Value::from(format!(
                    "hello {} from worker {worker}",
                    self.info.request_id
                )))
            }
            other => Err(UnknownMethod::new(other).into()),
        }
    }
}

struct MathModule;
declare_token!(MathModule);

struct AppModule;
declare_token!(AppModule);

fn catalog() -> Result<Catalog> {
    Ok(Catalog::builder()
        .provider(ProviderDef::of(|_| Ok(PiService)).offload("pi"))
        .provider(
            ProviderDef::of(|r| {
                let request_id = r
                    .request()
                    .and_then(|req| req.get("requestId").and_then(Value::as_str).map(String::from))
                    .unwrap_or_default();
                Ok(RequestInfo { request_id })
            })
            .request_scoped(),
        )
        .provider(
            ProviderDef::of(|r| Ok(Greeter { info: r.get::<RequestInfo>()? }))
                .depends_on(RequestInfo::token_id())
                .offload("greet"),
        )
        .module(
            ModuleDef::of::<MathModule>()
                .provide(PiService::token_id())
                .provide(RequestInfo::token_id())
                .provide(Greeter::token_id())
                .enable_offload(),
        )
        .module(ModuleDef::of::<AppModule>().import(MathModule::token_id()))
        .build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    let config = OffloadConfig {
        pool: cli.threads.map(PoolConfig::fixed).unwrap_or_default(),
        ..OffloadConfig::default()
    };
    let app = OffloadApp::start(Arc::new(catalog()?), &AppModule::token_id(), config).await?;

    let offloaded = app
        .call(&PiService::token_id(), "pi", vec![Value::from(cli.terms)])
        .await?;
    let local = app.instance::<PiService>()?.invoke("pi", vec![Value::from(cli.terms)]).await?;
    info!(terms = cli.terms, offloaded = ?offloaded.as_f64(), local = ?local.as_f64(), "pi computed");

    let greeter = Greeter::token_id();
    let calls = cli.requests.iter().map(|id| {
        let request = RequestContext::new().with("requestId", id.as_str());
        app.call(&greeter, "greet", vec![Value::from(request)])
    });
    for greeting in futures_util::future::join_all(calls).await {
        info!(greeting = ?greeting?.as_str(), "request-scoped call finished");
    }

    println!("{}", serde_json::to_string_pretty(&app.stats())?);
    app.shutdown().await;
    Ok(())
}
