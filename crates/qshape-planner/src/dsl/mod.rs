//! Query definitions written as YAML documents.

pub mod yaml;

pub use yaml::{parse_yaml_query, DslError, ParsedQuery, QueryConfigDef};
