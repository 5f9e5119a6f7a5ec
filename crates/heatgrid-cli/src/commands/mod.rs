//! CLI command implementations.

pub mod config;
pub mod run;

use heatgrid::{BoundaryPolicy, InitialCondition};

/// Parse `fixed:<value>`, a bare number, or `mirror`.
pub fn parse_boundary(s: &str) -> Result<BoundaryPolicy, String> {
    let s = s.trim().to_lowercase();
    if s == "mirror" {
        return Ok(BoundaryPolicy::Mirror);
    }
    let value = s.strip_prefix("fixed:").unwrap_or(&s);
    value
        .parse::<f32>()
        .map(BoundaryPolicy::Fixed)
        .map_err(|_| format!("expected 'mirror', 'fixed:<value>' or a number, got '{}'", s))
}

/// Parse `tile`, `global`, or `uniform:<value>`.
pub fn parse_initial(s: &str) -> Result<InitialCondition, String> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "tile" => Ok(InitialCondition::Tile),
        "global" => Ok(InitialCondition::Global),
        other => other
            .strip_prefix("uniform:")
            .and_then(|v| v.parse::<f32>().ok())
            .map(InitialCondition::Uniform)
            .ok_or_else(|| {
                format!(
                    "expected 'tile', 'global' or 'uniform:<value>', got '{}'",
                    other
                )
            }),
    }
}
