use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod classify;
mod config;
mod dispatch;
mod error;
mod mailer;
mod models;
mod processor;
mod rate_limit;
mod templates;
mod validation;

use config::{Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = config::parse_args();
    let config = Arc::new(config::build_config(&args)?);

    match &args.command {
        Command::Serve { .. } => {
            info!("Starting form API server on {}:{}", config.host, config.port);
            api::start_api_server(config).await?;
        }
        Command::Render { input, output_dir } => {
            info!(
                "Rendering quote emails from {} into {}",
                input.display(),
                output_dir.display()
            );
            render_file(input, output_dir, &config)?;
        }
    }

    Ok(())
}

/// Renders the four quote emails for every submission in `input` without sending anything.
fn render_file(input: &Path, output_dir: &Path, config: &Config) -> Result<()> {
    let input_data = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let parsed: Value = serde_json::from_str(&input_data)
        .with_context(|| format!("Failed to parse JSON from {}", input.display()))?;
    let submissions = match parsed {
        Value::Array(items) => items,
        single => vec![single],
    };

    info!("Loaded {} submissions from {}", submissions.len(), input.display());
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let progress_bar = indicatif::ProgressBar::new(submissions.len() as u64);
    progress_bar.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let mut index = Vec::with_capacity(submissions.len());
    for (position, submission) in submissions.iter().enumerate() {
        let record = match validation::validate_quote(submission) {
            Ok(record) => record,
            Err(fields) => {
                tracing::warn!("Submission {} is invalid: {:?}", position, fields);
                index.push(json!({ "index": position, "errors": fields }));
                progress_bar.inc(1);
                continue;
            }
        };

        let now = Utc::now();
        let classification = classify::classify(&record);
        let reference_id = models::ReferenceId::generate(processor::QUOTE_PREFIX, now);
        let ctx = templates::RenderContext {
            reference_id: &reference_id,
            rendered_at: now,
            brand: &config.brand,
        };
        let emails = templates::render_quote(&record, &classification, &ctx);

        for (role, email) in [("admin", &emails.admin), ("customer", &emails.customer)] {
            let stem = output_dir.join(format!("{}-{}", reference_id, role));
            std::fs::write(stem.with_extension("html"), &email.html)?;
            std::fs::write(stem.with_extension("txt"), &email.text)?;
        }

        index.push(json!({
            "index": position,
            "referenceId": reference_id,
            "priority": classification.priority,
            "estimatedValue": classification.estimated_value,
            "adminSubject": emails.admin.subject,
            "customerSubject": emails.customer.subject,
        }));
        progress_bar.set_message(reference_id.to_string());
        progress_bar.inc(1);
    }

    progress_bar.finish_with_message("Rendering complete");

    let index_path = output_dir.join("index.json");
    std::fs::write(&index_path, serde_json::to_string_pretty(&index)?)?;
    info!("Wrote index of {} submissions to {}", index.len(), index_path.display());

    Ok(())
}
