use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fetch_core::{
    render::{self, Content, RenderFrame},
    DecodeMode, FetchConfig, FetchController, FetchSnapshot, Payload, RequestOptions,
};
use reqwest::header::{HeaderName, HeaderValue};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser, Debug)]
#[command(
    name = "fetchcli",
    about = "Watch a URL through a declarative fetch controller"
)]
struct Args {
    /// URL to fetch. Falls back to the settings file and FETCHCLI_URL; may
    /// be omitted entirely when URLs arrive on stdin.
    url: Option<String>,
    /// HTTP method for the declared options.
    #[arg(long)]
    method: Option<String>,
    /// Extra request header as NAME:VALUE. Repeatable.
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,
    /// Request body sent with the declared options.
    #[arg(long)]
    body: Option<String>,
    /// Body decoding mode: json, text or bytes.
    #[arg(long)]
    decode: Option<DecodeMode>,
    /// Do not auto-fetch on startup or on URL changes.
    #[arg(long)]
    manual: bool,
    /// Replay settled outcomes per URL instead of refetching.
    #[arg(long)]
    cache: bool,
    /// Issue a single request, print the settled state, and exit.
    #[arg(long)]
    once: bool,
    /// Path to a TOML settings file (default: ./fetchcli.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let settings = config::load_settings(args.config.as_deref());

    let declaration = FetchConfig {
        url: args.url.clone().or_else(|| settings.url.clone()),
        options: build_options(&args)?.into(),
        manual: args.manual || settings.manual,
        decode: args.decode.unwrap_or(settings.decode),
        cache: args.cache || settings.cache,
    };

    if args.once {
        run_once(declaration).await
    } else {
        run_watch(declaration).await
    }
}

async fn run_once(declaration: FetchConfig) -> Result<()> {
    let controller = FetchController::start(FetchConfig {
        manual: true,
        ..declaration
    })
    .await;
    let state = controller.trigger(None, None).await?;

    let frame = RenderFrame::new(
        FetchSnapshot {
            request: controller.request().await,
            state,
        },
        Arc::clone(&controller),
    );
    if let Some(line) = render::render(&transition_view(), &frame) {
        println!("{line}");
    }
    controller.shutdown();
    Ok(())
}

async fn run_watch(declaration: FetchConfig) -> Result<()> {
    let controller = FetchController::start(declaration.clone()).await;
    let mut events = controller.subscribe();
    let view = transition_view();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let current = RenderFrame::new(
        FetchSnapshot {
            request: controller.request().await,
            state: controller.state().await,
        },
        Arc::clone(&controller),
    );
    if let Some(line) = render::render(&view, &current) {
        println!("{line}");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(snapshot) => {
                    let frame = RenderFrame::new(snapshot, Arc::clone(&controller));
                    if let Some(line) = render::render(&view, &frame) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "fetchcli: dropped transitions");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    let url = line.trim();
                    if url.is_empty() {
                        continue;
                    }
                    controller
                        .update(FetchConfig {
                            url: Some(url.to_string()),
                            ..declaration.clone()
                        })
                        .await;
                }
                None => break,
            },
        }
    }
    controller.shutdown();
    Ok(())
}

fn build_options(args: &Args) -> Result<RequestOptions> {
    let mut options = match &args.method {
        Some(method) => RequestOptions::new(
            method
                .to_uppercase()
                .parse()
                .map_err(|_| anyhow!("invalid method '{method}'"))?,
        ),
        None => RequestOptions::default(),
    };
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("header '{header}' is not NAME:VALUE"))?;
        let name: HeaderName = name
            .trim()
            .parse()
            .with_context(|| format!("invalid header name in '{header}'"))?;
        let value: HeaderValue = value
            .trim()
            .parse()
            .with_context(|| format!("invalid header value in '{header}'"))?;
        options.headers.insert(name, value);
    }
    if let Some(body) = &args.body {
        options = options.body(body.clone());
    }
    Ok(options)
}

/// One line per transition; the settled arm chains to a second render
/// function that splits the success and error shapes.
fn transition_view() -> Content<String> {
    Content::func(|frame| {
        let url = frame
            .request
            .url
            .clone()
            .unwrap_or_else(|| "<no url>".to_string());
        match frame.state.loading {
            None => Content::Node(format!("[idle] {url}")),
            Some(true) => Content::Node(format!("[loading] {url}")),
            Some(false) => Content::func(move |frame| {
                if let Some(error) = &frame.state.error {
                    let detail = error
                        .payload()
                        .map(|payload| format!("\n{}", format_payload(payload)))
                        .unwrap_or_default();
                    Content::Node(format!("[error] {url}: {error}{detail}"))
                } else if let Some(data) = &frame.state.data {
                    Content::Node(format!("[done] {url}\n{}", format_payload(data)))
                } else {
                    Content::Node(format!("[settled] {url}"))
                }
            }),
        }
    })
}

fn format_payload(payload: &Payload) -> String {
    match payload {
        Payload::Json(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Payload::Text(text) => text.clone(),
        Payload::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        Payload::Undecodable(err) => format!("<{err}>"),
    }
}
