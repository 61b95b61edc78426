#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{net::SocketAddr, path::PathBuf};

use actix_web::{App, HttpServer};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use m3u8_peek::{
    highlight::{highlight, to_ansi},
    presentation::{Phase, ProxyClient, UiState},
    proxy::{ProxySettings, init_http_client},
    server,
};
use reqwest::Url;
use tracing::{info, warn};

/// Fetches M3U8 playlists through a header-spoofing proxy and shows them highlighted
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serves the playlist viewer page and the fetch proxy endpoint
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "M3U8_PEEK_BIND", default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Only forward requests to this host or its subdomains (repeatable). Forwards anywhere when unset
        #[arg(long = "allow-host", value_name = "HOST")]
        allowed_hosts: Vec<String>,
    },

    /// Fetches a playlist through a running proxy and prints it highlighted
    Fetch {
        /// Playlist URL
        url: String,

        /// `Referer` header to send upstream
        #[arg(short, long)]
        referer: Option<String>,

        /// `User-Agent` header to send upstream
        #[arg(short = 'A', long)]
        user_agent: Option<String>,

        /// Base URL of the proxy
        #[arg(long, env = "M3U8_PEEK_PROXY", default_value = "http://127.0.0.1:3000")]
        proxy: Url,

        /// Also save the raw playlist as `playlist.m3u8.txt`
        #[arg(short, long)]
        export: bool,

        /// Directory to save the export in (defaults to the current directory)
        #[arg(long, requires = "export")]
        export_dir: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    match Args::parse().command {
        Command::Serve {
            bind,
            allowed_hosts,
        } => serve(bind, allowed_hosts).await,
        Command::Fetch {
            url,
            referer,
            user_agent,
            proxy,
            export,
            export_dir,
        } => {
            let state = UiState::new(
                url,
                referer.unwrap_or_default(),
                user_agent.unwrap_or_default(),
            );
            fetch(state, proxy, export.then(|| export_dir.unwrap_or_default())).await
        }
    }
}

async fn serve(bind: SocketAddr, allowed_hosts: Vec<String>) -> Result<()> {
    let settings = ProxySettings::new(allowed_hosts);
    let client = init_http_client(&settings).context("Building outbound HTTP client")?;
    if settings.is_open() {
        warn!("No --allow-host given, requests will be forwarded to any destination");
    }

    info!("Listening on http://{bind}");
    HttpServer::new(move || App::new().configure(server::routes(client.clone(), settings.clone())))
        .bind(bind)
        .with_context(|| format!("Binding HTTP server on {bind}"))?
        .run()
        .await
        .context("Running HTTP server")
}

async fn fetch(mut state: UiState, proxy: Url, export_dir: Option<PathBuf>) -> Result<()> {
    let client = init_http_client(&ProxySettings::default()).context("Building HTTP client")?;
    info!("Fetching {} through {proxy}", state.url);
    state.submit(&ProxyClient::new(client, proxy)).await;

    match state.phase() {
        Phase::Success(content) => println!("{}", to_ansi(&highlight(content))),
        Phase::Failure(error) => bail!("{error}"),
        Phase::Idle | Phase::Loading => {}
    }

    if let (Some(dir), Some(export)) = (export_dir, state.export()) {
        let path = export
            .write_to(&dir)
            .await
            .context("Saving playlist export")?;
        info!("Saved raw playlist to {path:?}");
    }

    Ok(())
}
