use anyhow::{anyhow, Context};
use greenlight::config::{GreenlightConfig, ReportFormat, StackManifest};
use greenlight::plan::StartupPlan;
use greenlight::registry::ServiceRegistry;
use greenlight::telemetry;
use std::path::PathBuf;

enum CliCommand {
    Run {
        manifest_path: Option<String>,
        report_format: Option<ReportFormat>,
    },
    Plan {
        manifest_path: Option<String>,
    },
    Validate {
        manifests: Vec<String>,
    },
    Help,
    PlanHelp,
    ValidateHelp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Run {
            manifest_path,
            report_format,
        } => {
            let mut config = GreenlightConfig::load().context("failed to load configuration")?;
            if let Some(path) = manifest_path {
                config.manifest.path = path;
            }
            if let Some(format) = report_format {
                config.report.format = format;
            }
            let format = config.report.format;

            let app = greenlight::app::GreenlightApp::initialise(config)
                .context("failed to construct application")?;

            let report = app.run().await.context("startup run failed")?;

            match format {
                ReportFormat::Json => {
                    println!(
                        "{}",
                        report.to_json().context("failed to render JSON report")?
                    );
                }
                ReportFormat::Table => print!("{}", report.render_table()),
            }

            if report.is_ready() {
                Ok(())
            } else {
                Err(anyhow!(
                    "stack `{}` finished {}",
                    report.stack,
                    report.state.as_str()
                ))
            }
        }
        CliCommand::Plan { manifest_path } => {
            run_plan_command(manifest_path)?;
            Ok(())
        }
        CliCommand::Validate { manifests } => {
            run_validate_command(manifests)?;
            Ok(())
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::PlanHelp => {
            print_plan_help();
            Ok(())
        }
        CliCommand::ValidateHelp => {
            print_validate_help();
            Ok(())
        }
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run {
            manifest_path: None,
            report_format: None,
        });
    };

    if first == "validate" {
        return parse_validate_args(args);
    }

    if first == "plan" {
        return parse_plan_args(args);
    }

    let mut manifest_path = None;
    let mut report_format = None;
    let mut pending = Some(first);

    loop {
        let arg = match pending.take() {
            Some(value) => value,
            None => match args.next() {
                Some(value) => value,
                None => break,
            },
        };

        match arg.as_str() {
            "-c" | "--config" => {
                if manifest_path.is_some() {
                    anyhow::bail!("manifest path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                manifest_path = Some(value);
            }
            "--report" => {
                if report_format.is_some() {
                    anyhow::bail!("report format specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected format after --report"))?;
                report_format = Some(parse_report_format(&value)?);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run {
        manifest_path,
        report_format,
    })
}

fn parse_plan_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut manifest_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if manifest_path.is_some() {
                    anyhow::bail!("manifest path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                manifest_path = Some(value);
            }
            "-h" | "--help" => return Ok(CliCommand::PlanHelp),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Plan { manifest_path })
}

fn parse_validate_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut manifests = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::ValidateHelp),
            other => manifests.push(other.to_string()),
        }
    }

    if manifests.is_empty() {
        anyhow::bail!("greenlight validate requires at least one manifest path");
    }

    Ok(CliCommand::Validate { manifests })
}

fn parse_report_format(value: &str) -> anyhow::Result<ReportFormat> {
    match value.to_ascii_lowercase().as_str() {
        "table" => Ok(ReportFormat::Table),
        "json" => Ok(ReportFormat::Json),
        other => anyhow::bail!("unsupported report format `{other}` (expected `table` or `json`)"),
    }
}

fn print_help() {
    println!(
        "\
Usage: greenlight [OPTIONS]
       greenlight plan [OPTIONS]
       greenlight validate <MANIFEST>...

Options:
  -c, --config <PATH>    Path to the stack manifest YAML file
      --report <FORMAT>  Report output format: `table` or `json`
  -h, --help             Print this help message

Plan:
  -c, --config <PATH>    Path to the stack manifest YAML file
  -h, --help             Print this help message

Validate:
  -h, --help             Print this help message
"
    );
}

fn print_plan_help() {
    println!(
        "\
Usage: greenlight plan [OPTIONS]

Resolves the dependency graph and prints the startup order without
launching anything.

Options:
  -c, --config <PATH>    Path to the stack manifest YAML file
  -h, --help             Print this help message
"
    );
}

fn print_validate_help() {
    println!(
        "\
Usage: greenlight validate <MANIFEST>...

Options:
  -h, --help             Print this help message
"
    );
}

fn run_plan_command(manifest_path: Option<String>) -> anyhow::Result<()> {
    let mut config = GreenlightConfig::load().context("failed to load configuration")?;
    if let Some(path) = manifest_path {
        config.manifest.path = path;
    }

    let manifest = StackManifest::from_path(&config.manifest.path)
        .with_context(|| format!("failed to load stack manifest from {}", config.manifest.path))?;
    let stack_name = manifest.app.stack_name.clone();
    let registry =
        ServiceRegistry::from_specs(manifest.services).context("invalid service set")?;
    let plan = StartupPlan::resolve(&registry).context("failed to resolve startup plan")?;

    println!("startup order for stack `{stack_name}`:");
    for (position, &index) in plan.order().iter().enumerate() {
        let spec = &registry.all()[index];
        if spec.depends_on.is_empty() {
            println!("{:>3}. {}", position + 1, spec.name);
        } else {
            println!(
                "{:>3}. {} (after {})",
                position + 1,
                spec.name,
                spec.depends_on.join(", ")
            );
        }
    }

    Ok(())
}

fn run_validate_command(manifests: Vec<String>) -> anyhow::Result<()> {
    let mut had_error = false;

    for manifest in manifests {
        let path = PathBuf::from(&manifest);
        let resolved = StackManifest::from_path(&path)
            .map_err(greenlight::error::Error::from)
            .and_then(|parsed| {
                let registry = ServiceRegistry::from_specs(parsed.services)?;
                StartupPlan::resolve(&registry)
            });

        match resolved {
            Ok(_) => println!("validated {}", path.display()),
            Err(err) => {
                eprintln!("{err}");
                had_error = true;
            }
        }
    }

    if had_error {
        Err(anyhow!("one or more manifests failed validation"))
    } else {
        Ok(())
    }
}
