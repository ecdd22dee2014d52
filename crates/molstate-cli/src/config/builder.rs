use super::file::{FileInheritedErrors, ScenarioFile};
use super::models::AppConfig;
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use molstate::engine::config::{EngineConfigBuilder, InheritedErrors};

pub fn build_config(args: &RunArgs) -> Result<AppConfig> {
    let file = ScenarioFile::from_file(&args.scenario)?;
    let mut file = apply_set_values(file, &args.set_values)?;

    let engine_file = file.engine.take().unwrap_or_default();

    let mut builder = EngineConfigBuilder::new();
    if let Some(limit) = args.max_concurrency.or(engine_file.max_concurrency) {
        builder = builder.max_concurrent_transforms(limit);
    }

    let inherited_errors = if args.verbatim_errors {
        Some(InheritedErrors::Verbatim)
    } else {
        engine_file.inherited_errors.map(Into::into)
    };
    if let Some(mode) = inherited_errors {
        builder = builder.inherited_errors(mode);
    }

    let dispose_on_replace = if args.keep_replaced {
        Some(false)
    } else {
        engine_file.dispose_on_replace
    };
    if let Some(enabled) = dispose_on_replace {
        builder = builder.dispose_on_replace(enabled);
    }

    let engine = builder
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(AppConfig {
        scenario_path: args.scenario.clone(),
        engine,
        transactions: file.transaction,
        show_hidden: args.show_hidden,
        render_each: args.each,
    })
}

fn apply_set_values(mut config: ScenarioFile, set_values: &[String]) -> Result<ScenarioFile> {
    if set_values.is_empty() {
        return Ok(config);
    }
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        let engine = config.engine.get_or_insert_with(Default::default);
        match key {
            "engine.max-concurrency" => {
                engine.max_concurrency = Some(value_str.parse().map_err(|_| {
                    CliError::Config(format!("Invalid integer value for {}: {}", key, value_str))
                })?);
            }
            "engine.inherited-errors" => {
                engine.inherited_errors = Some(match value_str {
                    "annotate" => FileInheritedErrors::Annotate,
                    "verbatim" => FileInheritedErrors::Verbatim,
                    _ => {
                        return Err(CliError::Config(format!(
                            "Invalid value for {}: '{}' (expected 'annotate' or 'verbatim')",
                            key, value_str
                        )));
                    }
                });
            }
            "engine.dispose-on-replace" => {
                engine.dispose_on_replace = Some(value_str.parse().map_err(|_| {
                    CliError::Config(format!("Invalid boolean value for {}: {}", key, value_str))
                })?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}
