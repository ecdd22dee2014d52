use crate::builtin::register_builtins;
use crate::cli::TransformersArgs;
use crate::error::Result;
use molstate::core::models::params::{ParamKind, ParamSchema, ParamValue};
use molstate::engine::error::EngineError;
use molstate::engine::registry::{RegistrySnapshot, TransformerRegistry};
use std::fmt::Write;
use tracing::info;

pub async fn run(args: TransformersArgs) -> Result<()> {
    let registry = TransformerRegistry::new();
    register_builtins(&registry).map_err(EngineError::from)?;
    info!("Listing {} registered transformers.", registry.ids().len());
    print!("{}", render_catalog(&registry.snapshot(), args.params));
    Ok(())
}

pub fn render_catalog(snapshot: &RegistrySnapshot, with_params: bool) -> String {
    let mut out = String::new();
    for definition in snapshot.definitions() {
        let accepts = match definition.accepted_kinds() {
            Some([]) => "nothing".to_string(),
            Some(kinds) => kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            None => "any".to_string(),
        };
        let _ = write!(
            out,
            "{:<18} {:<10} accepts: {}",
            definition.id.as_str(),
            definition.display_name,
            accepts
        );
        if definition.is_async() {
            out.push_str(" (async)");
        }
        out.push('\n');
        if let Some(description) = &definition.description {
            let _ = writeln!(out, "    {}", description);
        }
        if with_params {
            write_schema(&mut out, &definition.param_schema, 2);
        }
    }
    out
}

fn write_schema(out: &mut String, schema: &ParamSchema, depth: usize) {
    for (name, definition) in schema.iter() {
        let indent = depth * 2;
        let kind = match &definition.kind {
            ParamKind::Boolean => "boolean".to_string(),
            ParamKind::Number { min, max, .. } => match (min, max) {
                (Some(lo), Some(hi)) => format!("number in [{}, {}]", lo, hi),
                _ => "number".to_string(),
            },
            ParamKind::Select { options } => format!("one of {}", options.join("|")),
            ParamKind::MultiSelect { options } => format!("any of {}", options.join("|")),
            ParamKind::Interval { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => format!("interval within [{}, {}]", lo, hi),
                _ => "interval".to_string(),
            },
            ParamKind::Vec3 => "vec3".to_string(),
            ParamKind::Text => "text".to_string(),
            ParamKind::Group(_) => "group".to_string(),
        };
        let _ = write!(out, "{:indent$}- {}: {}", "", name, kind, indent = indent);
        if !matches!(definition.default, ParamValue::Group(_)) {
            let _ = write!(out, " = {}", format_value(&definition.default));
        }
        out.push('\n');
        if let ParamKind::Group(inner) = &definition.kind {
            write_schema(out, inner, depth + 1);
        }
    }
}

fn format_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Number(n) => n.to_string(),
        ParamValue::Text(t) => format!("\"{}\"", t),
        ParamValue::List(items) => format!(
            "[{}]",
            items.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
        ParamValue::Group(_) => "{..}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(with_params: bool) -> String {
        let registry = TransformerRegistry::new();
        register_builtins(&registry).unwrap();
        render_catalog(&registry.snapshot(), with_params)
    }

    #[test]
    fn lists_transformers_sorted_by_id() {
        let text = catalog(false);
        let ids: Vec<&str> = text
            .lines()
            .filter(|line| !line.starts_with(' '))
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        assert_eq!(
            ids,
            vec![
                "number.add",
                "number.clamp",
                "number.constant",
                "number.delay",
                "number.divide",
                "number.double",
                "root",
            ]
        );
    }

    #[test]
    fn marks_async_transformers_and_acceptance() {
        let text = catalog(false);
        let delay = text.lines().find(|l| l.starts_with("number.delay")).unwrap();
        assert!(delay.ends_with("accepts: number (async)"));
        let root = text.lines().find(|l| l.starts_with("root")).unwrap();
        assert!(root.ends_with("accepts: nothing"));
    }

    #[test]
    fn params_show_kind_and_default() {
        let text = catalog(true);
        assert!(text.contains("    - divisor: number = 1\n"));
        assert!(text.contains("    - millis: number in [0, 60000] = 100\n"));
        assert!(!catalog(false).contains("- divisor"));
        assert!(text.contains("    - bounds: interval = [0, 100]\n"));
    }

    #[test]
    fn list_backed_params_render_their_options() {
        use molstate::core::models::object::StateObject;
        use molstate::core::models::params::ParamDefinition;
        use molstate::engine::registry::TransformerDefinition;

        let registry = TransformerRegistry::new();
        registry
            .register(
                TransformerDefinition::builder("view")
                    .params(
                        ParamSchema::new()
                            .with(
                                "components",
                                ParamDefinition::multi_select(&["polymer"], &["polymer", "water"]),
                            )
                            .with(
                                "clip",
                                ParamDefinition::bounded_interval((1.0, 2.0), 0.0, 10.0),
                            )
                            .with("axis", ParamDefinition::vec3([0.0, 0.0, 1.0])),
                    )
                    .apply(|_| Ok(StateObject::root()))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let text = render_catalog(&registry.snapshot(), true);
        assert!(text.contains("    - components: any of polymer|water = [\"polymer\"]\n"));
        assert!(text.contains("    - clip: interval within [0, 10] = [1, 2]\n"));
        assert!(text.contains("    - axis: vec3 = [0, 0, 1]\n"));
    }
}
