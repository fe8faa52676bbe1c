//! Send one request through the protocol-aware router and print the response.
//!
//! `--http2` sends the request as HTTP/2 with prior knowledge (h2c); otherwise it
//! goes out as HTTP/1.1. Use `--help` to see the options.

use std::time::Duration;

use bytes::Bytes;
use clap::{arg, value_parser, ArgAction};
use color_eyre::eyre::{eyre, WrapErr as _};
use http::Uri;
use http_body_util::{BodyExt as _, Full};
use tokio::io::AsyncWriteExt as _;
use tower::ServiceExt as _;
use tracing::Level;
use tracing_subscriber::{
    filter::Targets, fmt::format::FmtSpan, layer::SubscriberExt as _,
    util::SubscriberInitExt as _, Layer as _,
};

fn command() -> clap::Command {
    clap::Command::new("fetch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Send a request through the autotransport router")
        .args([
            clap::Arg::new("uri").help("Target URI").required(true),
            arg!(-X --method [METHOD] "HTTP method to use").default_value("GET"),
            arg!(-d --body [BODY] "HTTP body to send"),
            arg!(-H --header [HEADER]... "HTTP headers to send"),
            clap::Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_name("MILLISECONDS")
                .help("Connect timeout in milliseconds")
                .default_value("200")
                .value_parser(value_parser!(u64).range(1..)),
            clap::Arg::new("http2")
                .long("http2")
                .short('2')
                .help("Use HTTP/2 over cleartext (h2c)")
                .action(ArgAction::SetTrue),
        ])
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = Targets::new()
        .with_target("autotransport", Level::TRACE)
        .with_target("fetch", Level::TRACE)
        .with_default(Level::INFO);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter),
        )
        .init();

    let args = command().get_matches();

    let uri: Uri = args
        .get_one::<String>("uri")
        .ok_or_else(|| eyre!("missing uri"))?
        .parse()
        .wrap_err("invalid uri")?;

    let method: http::Method = args
        .get_one::<String>("method")
        .map(String::as_str)
        .unwrap_or("GET")
        .parse()
        .wrap_err("invalid method")?;

    let version = if args.get_flag("http2") {
        http::Version::HTTP_2
    } else {
        http::Version::HTTP_11
    };

    let connect_timeout = args
        .get_one::<u64>("connect-timeout")
        .copied()
        .map(Duration::from_millis)
        .unwrap_or(autotransport::client::DEFAULT_CONNECT_TIMEOUT);

    let mut builder = http::Request::builder()
        .uri(uri)
        .method(method)
        .version(version)
        .header(
            http::header::USER_AGENT,
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
        );

    if let Some(headers) = args.get_many::<String>("header") {
        for header in headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| eyre!("header must be NAME: VALUE, got {header:?}"))?;
            let name: http::HeaderName = name.trim().parse()?;
            let value: http::HeaderValue = value.trim().parse()?;
            builder = builder.header(name, value);
        }
    }

    let body = args
        .get_one::<String>("body")
        .map(|body| Bytes::from(body.clone()))
        .unwrap_or_default();
    let request = builder.body(Full::new(body))?;

    let transport = autotransport::client::Builder::new()
        .connect_timeout(connect_timeout)
        .build::<Full<Bytes>>();

    send(transport, request).await
}

#[tracing::instrument(level = "trace", skip_all, fields(uri = %request.uri(), version = ?request.version()))]
async fn send(
    transport: autotransport::client::DefaultTransport<Full<Bytes>>,
    request: http::Request<Full<Bytes>>,
) -> color_eyre::Result<()> {
    let response = transport
        .oneshot(request)
        .await
        .wrap_err("request failed")?;

    let (parts, mut body) = response.into_parts();
    println!("{:?} {}", parts.version, parts.status);
    for (name, value) in &parts.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();

    let mut stdout = tokio::io::stdout();
    let mut total = 0usize;
    while let Some(frame) = body.frame().await {
        if let Some(data) = frame?.data_ref() {
            total += data.len();
            stdout.write_all(data).await?;
        }
    }
    stdout.flush().await?;

    tracing::debug!(bytes = total, "response body received");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_valid() {
        command().debug_assert();
    }

    #[test]
    fn http2_flag_selects_h2c() {
        let args = command()
            .try_get_matches_from(["fetch", "--http2", "http://localhost/"])
            .unwrap();
        assert!(args.get_flag("http2"));

        let args = command()
            .try_get_matches_from(["fetch", "http://localhost/"])
            .unwrap();
        assert!(!args.get_flag("http2"));
    }

    #[test]
    fn only_http2_is_a_version_flag() {
        assert!(command()
            .try_get_matches_from(["fetch", "--http1", "http://localhost/"])
            .is_err());
    }
}
