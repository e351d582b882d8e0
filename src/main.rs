use anyhow::Context;
use clap::Parser;
use rectal_air_check::core::advisory::{format_value, predicted_lines};
use rectal_air_check::core::engine::{error_exit_code, exit_code};
use rectal_air_check::core::ConfigProvider;
use rectal_air_check::utils::{logger, validation::Validate};
use rectal_air_check::{
    Assessment, CheckEngine, CliConfig, FractionSummary, LocalStorage, RectalAirPipeline, TomlConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let toml_config = match &cli.config {
        Some(path) => Some(
            TomlConfig::from_file(path)
                .with_context(|| format!("Failed to load config file '{}'", path))?,
        ),
        None => None,
    };

    let log_level = toml_config.as_ref().and_then(TomlConfig::log_level);
    if cli.log_json {
        logger::init_json_logger(cli.verbose, log_level);
    } else {
        logger::init_cli_logger(cli.verbose, log_level);
    }

    tracing::info!("🚀 Starting rectal-air-check");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let code = match toml_config {
        Some(mut config) => {
            tracing::info!(
                "📁 Loaded protocol configuration from: {}",
                cli.config.as_deref().unwrap_or_default()
            );
            config.apply_cli_overrides(&cli);
            let monitor_enabled = config.monitoring_enabled();
            execute(config, &cli, monitor_enabled).await
        }
        None => execute(cli.clone(), &cli, cli.monitor).await,
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

async fn execute<C: ConfigProvider + Validate>(config: C, cli: &CliConfig, monitor_enabled: bool) -> i32 {
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        return 1;
    }

    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let pipeline = RectalAirPipeline::new(LocalStorage::default(), config);
    let engine = CheckEngine::new_with_monitoring(pipeline, monitor_enabled);

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - fraction summary only");
        return match engine.summary().await {
            Ok(summary) => {
                print_summary(&summary);
                0
            }
            Err(e) => report_error(&e),
        };
    }

    let result = engine.run().await;
    match &result {
        Ok(outcome) => {
            print_summary(&outcome.assessment.summary);
            print_assessment(&outcome.assessment);
            println!("📁 Output saved to: {}", outcome.output_path);
        }
        Err(e) => {
            report_error(e);
        }
    }

    exit_code(&result, cli.strict)
}

fn report_error(e: &rectal_air_check::CheckError) -> i32 {
    tracing::error!(
        "❌ Rectal air check failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    error_exit_code(e)
}

fn print_summary(summary: &FractionSummary) {
    println!("{:<28}{}", "Plan Name:", summary.plan_name);
    println!("{}", "-".repeat(48));
    println!("{:<28}{}", "Patient Name:", summary.patient_name);
    println!("{:<28}{}", "Total Treatment Fractions:", summary.total_fractions);
    println!("{:<28}{}", "Fractions Delivered:", summary.delivered_fractions);
    println!("{}", "-".repeat(48));
}

fn print_assessment(assessment: &Assessment) {
    println!("{:<28}{}", "Protocol:", assessment.protocol_name);
    if let Some(projected) = &assessment.projected {
        println!("{}", predicted_lines(projected));
    }
    println!();
    println!("== {} ==", assessment.advisory.title());
    println!("{}", assessment.advisory.message());

    let Some(first) = assessment.simulation.first() else {
        return;
    };

    println!();
    let mut header = format!("{:>9} {:>14}", "Fraction", "Air fractions");
    for value in &first.metrics.values {
        header.push_str(&format!(
            " {:>18}",
            format!("{} (< {})", value.label, format_value(value.limit, value.unit))
        ));
    }
    println!("{}", header);

    for point in &assessment.simulation {
        let mut row = format!("{:>9} {:>14}", point.fraction_number, point.air_fractions);
        for value in &point.metrics.values {
            let marker = if value.exceeded { " !" } else { "  " };
            row.push_str(&format!(
                " {:>18}",
                format!("{}{}", format_value(value.value, value.unit), marker)
            ));
        }
        println!("{}", row);
    }
}
