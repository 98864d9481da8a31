use anyhow::Result;
use chrono::Local;
use gb_gateway::config::GatewayConfig;
use gb_gateway::gateway::Gateway;
#[cfg(feature = "monitor")]
use gb_gateway::http_service;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "gb-gateway")]
struct Opt {
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<PathBuf>,

    #[structopt(short = "b", long = "bind")]
    bind: Option<String>,

    #[structopt(short = "r", long = "rtmp")]
    rtmp: Option<String>,

    #[structopt(long = "http")]
    http: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                &record.args()
            )
        })
        .init();

    let opt = Opt::from_args();
    log::info!("{:?}", opt);

    let mut config = match &opt.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = opt.bind {
        config.listen = bind;
    }
    if let Some(rtmp) = opt.rtmp {
        config.rtmp_server = rtmp;
    }
    if let Some(http) = opt.http {
        config.http = http;
    }

    let mut gateway = Gateway::start(&config)?;

    #[cfg(feature = "monitor")]
    {
        let addr = config.http.parse()?;
        let manager_handle = gateway.handle();
        tokio::spawn(async move {
            if let Err(e) = http_service::Service::new(manager_handle, addr).run().await {
                log::error!("http service: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    gateway.stop_all().await?;
    Ok(())
}
