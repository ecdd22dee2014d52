//! Numeric transformers used by scenario files.
//!
//! Every object they produce carries an `f64` payload and shows it as its
//! description, so a rendered tree reads as a small calculation.

use molstate::core::models::object::{ObjectKind, StateObject};
use molstate::core::models::params::{ParamDefinition, ParamSchema};
use molstate::engine::context::TransformInput;
use molstate::engine::registry::{
    RegistryError, TransformError, TransformerDefinition, TransformerRegistry,
};
use std::time::Duration;
use tracing::trace;

pub const NUMBER: ObjectKind = ObjectKind::from_static("number");

pub fn number_object(label: &str, value: f64) -> StateObject {
    StateObject::new(NUMBER, label, value).with_description(value.to_string())
}

fn parent_value(input: &TransformInput) -> Result<f64, TransformError> {
    input
        .parent
        .data::<f64>()
        .copied()
        .ok_or_else(|| TransformError::failed("parent does not hold a number"))
}

fn param(input: &TransformInput, name: &str) -> Result<f64, TransformError> {
    input
        .params
        .number(name)
        .ok_or_else(|| TransformError::failed(format!("missing parameter '{}'", name)))
}

fn constant() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.constant")
        .display_name("Constant")
        .description("Introduces a number into the tree.")
        .from_kinds(&[ObjectKind::ROOT])
        .params(ParamSchema::new().with("value", ParamDefinition::number(0.0)))
        .apply(|input| Ok(number_object("Constant", param(input, "value")?)))
        .build()
}

fn double() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.double")
        .display_name("Double")
        .description("Multiplies the parent number by two.")
        .from_kinds(&[NUMBER])
        .apply(|input| Ok(number_object("Doubled", parent_value(input)? * 2.0)))
        .build()
}

fn add() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.add")
        .display_name("Add")
        .description("Adds a fixed amount to the parent number.")
        .from_kinds(&[NUMBER])
        .params(
            ParamSchema::new().with(
                "amount",
                ParamDefinition::number(1.0).with_label("Amount"),
            ),
        )
        .apply(|input| {
            let value = parent_value(input)? + param(input, "amount")?;
            Ok(number_object("Sum", value))
        })
        .build()
}

fn divide() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.divide")
        .display_name("Divide")
        .description("Divides the parent number; fails on a zero divisor.")
        .from_kinds(&[NUMBER])
        .params(ParamSchema::new().with("divisor", ParamDefinition::number(1.0)))
        .apply(|input| {
            let divisor = param(input, "divisor")?;
            if divisor == 0.0 {
                return Err(TransformError::failed("divide by zero"));
            }
            Ok(number_object("Quotient", parent_value(input)? / divisor))
        })
        .build()
}

fn clamp() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.clamp")
        .display_name("Clamp")
        .description("Limits the parent number to an interval.")
        .from_kinds(&[NUMBER])
        .params(ParamSchema::new().with(
            "bounds",
            ParamDefinition::interval((0.0, 100.0)).with_label("Bounds"),
        ))
        .apply(|input| {
            let (lo, hi) = input
                .params
                .interval("bounds")
                .ok_or_else(|| TransformError::failed("missing parameter 'bounds'"))?;
            Ok(number_object("Clamped", parent_value(input)?.clamp(lo, hi)))
        })
        .build()
}

fn delay() -> Result<TransformerDefinition, RegistryError> {
    TransformerDefinition::builder("number.delay")
        .display_name("Delay")
        .description("Passes the parent number through after waiting.")
        .from_kinds(&[NUMBER])
        .params(ParamSchema::new().with(
            "millis",
            ParamDefinition::range(100.0, 0.0, 60_000.0, 10.0)
                .with_description("Time to wait before producing the result."),
        ))
        .apply_async(|input: TransformInput| async move {
            let value = parent_value(&input)?;
            let millis = param(&input, "millis")?;
            tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            if input.context.is_stale() {
                trace!(node = %input.context.node_ref(), "Delay finished after being superseded");
            }
            Ok::<_, TransformError>(number_object("Delayed", value))
        })
        .build()
}

pub fn builtin_transformers() -> Result<Vec<TransformerDefinition>, RegistryError> {
    Ok(vec![
        constant()?,
        double()?,
        add()?,
        divide()?,
        clamp()?,
        delay()?,
    ])
}

pub fn register_builtins(registry: &TransformerRegistry) -> Result<(), RegistryError> {
    for definition in builtin_transformers()? {
        registry.register(definition)?;
    }
    Ok(())
}
