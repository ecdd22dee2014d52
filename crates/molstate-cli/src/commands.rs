pub mod run;
pub mod transformers;
