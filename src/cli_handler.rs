//! Subcommand handling for mitm-addon.
//!
//! Every subcommand works on the effective configuration: the scripts
//! directory and control channel come from config files or CLI flags.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::{Response, header};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::addon::{FlowTarget, LogEntry, LogLevel, ProxyAddonBuilder, ProxyHooks};
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::export::{Frame, MessageKind, read_frame};
use crate::inject::{ContentInjector, ScriptEntry, ScriptRegistry, ScriptSummary};

/// Payload bytes shown per frame by `decode` without `--full`.
const PREVIEW_LEN: usize = 64;

/// Run the subcommand selected on the command line.
pub fn handle_command(cli: &Cli, config: &Config) -> Result<()> {
    match cli.command {
        Commands::Scripts { json } => list_scripts(config, json),
        Commands::Match { ref url } => show_matches(config, url),
        Commands::Inject {
            ref url,
            ref file,
            ref output,
        } => inject_file(config, url, file, output.as_deref()),
        Commands::Decode { ref file, full } => decode(file.as_deref(), full),
        Commands::Probe { ref message } => probe(config, message),
        Commands::Config => print_config(config),
    }
}

/// Open the configured scripts directory.
fn open_registry(config: &Config) -> Result<ScriptRegistry> {
    let dir = config
        .injector
        .resolved_scripts_dir()
        .context("Failed to resolve scripts directory")?
        .context("Script injection is disabled")?;
    Ok(ScriptRegistry::new(dir))
}

fn parse_target(url: &str) -> Result<FlowTarget> {
    FlowTarget::parse_url(url).with_context(|| format!("Not an absolute URL: {}", url))
}

/// Print the scripts directory contents.
fn list_scripts(config: &Config, json: bool) -> Result<()> {
    let registry = open_registry(config)?;
    let entries = registry.scripts();

    if json {
        let summaries: Vec<ScriptSummary> = entries.iter().map(ScriptEntry::summary).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).context("Failed to serialize script list")?
        );
        return Ok(());
    }

    if entries.is_empty() {
        println!("No scripts in {}", registry.dir().display());
        return Ok(());
    }

    for entry in entries.iter() {
        let version = if entry.version().is_empty() {
            "unknown"
        } else {
            entry.version()
        };
        println!("{} v{} ({})", entry.name(), version, entry.file_name());

        if !entry.author().is_empty() {
            println!("    author:      {}", entry.author());
        }
        let description = entry.description();
        if !description.is_empty() {
            println!("    description: {}", description);
        }
        if let Some(script) = entry.script() {
            for rule in &script.match_rules {
                let note = if rule.is_valid() { "" } else { " (invalid)" };
                println!("    match:       {}{}", rule, note);
            }
            for dep in &script.dependencies {
                println!("    require:     {}", dep);
            }
        }
    }

    Ok(())
}

/// Print the scripts that would be injected into `url`, in injection order.
fn show_matches(config: &Config, url: &str) -> Result<()> {
    let target = parse_target(url)?;
    let injector = ContentInjector::new(Arc::new(open_registry(config)?));

    let scripts = injector.select(target.as_request_target());
    if scripts.is_empty() {
        println!("No script matches {}", target);
        return Ok(());
    }

    for script in scripts {
        for dep in &script.dependencies {
            println!("  <script src=\"{}\">", dep);
        }
        println!("{} ({})", script.name, script.file_name);
    }

    Ok(())
}

/// Rewrite a saved HTML page as if it had been served from `url`.
fn inject_file(config: &Config, url: &str, file: &Path, output: Option<&Path>) -> Result<()> {
    let target = parse_target(url)?;
    let injector = ContentInjector::new(Arc::new(open_registry(config)?));

    let html = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, "text/html")
        .body(Bytes::from(html))
        .context("Failed to build response")?;

    let names = injector
        .inject(target.as_request_target(), &mut response)
        .with_context(|| format!("Failed to inject into {}", file.display()))?;
    if names.is_empty() {
        warn!("No script matches {}, page left unchanged", target);
    } else {
        info!("Injected {}", names.join(", "));
    }

    match output {
        Some(path) => fs::write(path, response.body())
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => io::stdout()
            .write_all(response.body())
            .context("Failed to write to stdout")?,
    }

    Ok(())
}

/// Print the frames of a captured control-channel stream.
fn decode(file: Option<&Path>, full: bool) -> Result<()> {
    let mut reader: Box<dyn BufRead> = match file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let mut count = 0usize;
    while let Some(frame) = read_frame(&mut reader).context("Failed to decode frame")? {
        println!("{}", describe_frame(&frame, full));
        count += 1;
    }

    info!("Decoded {} frames", count);
    Ok(())
}

/// One line per frame: time, port, kind, length, then the payload.
fn describe_frame(frame: &Frame, full: bool) -> String {
    let time = i64::try_from(frame.timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| frame.timestamp_ms.to_string());

    let shown = if full || frame.kind.is_text() {
        &frame.payload[..]
    } else {
        &frame.payload[..frame.payload.len().min(PREVIEW_LEN)]
    };
    let mut preview = String::from_utf8_lossy(shown).escape_debug().to_string();
    if shown.len() < frame.payload.len() {
        preview.push_str("...");
    }

    format!(
        "{} {:>5} {:<10} {:>6}  {}",
        time,
        frame.port,
        frame.kind,
        frame.payload.len(),
        preview
    )
}

/// Check that the host accepts frames.
fn probe(config: &Config, message: &str) -> Result<()> {
    let channel = config
        .export
        .channel
        .clone()
        .context("No control channel configured (set export.channel or pass --channel)")?;

    let addon = ProxyAddonBuilder::from_config(config)
        .context("Invalid addon configuration")?
        .build()
        .context("Failed to start addon")?;

    addon.running();
    addon.log(&LogEntry::new(LogLevel::Info, message));

    if addon.exporter().is_closed() {
        bail!("Control channel {} closed while probing", channel);
    }

    println!("Sent {} and {} frames to {}", MessageKind::Running, MessageKind::Log, channel);
    Ok(())
}

/// Print the merged configuration.
fn print_config(config: &Config) -> Result<()> {
    let text = config.to_toml()?;
    print!("{}", text);
    Ok(())
}
