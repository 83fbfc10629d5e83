//! Renders a `LabelSelector` into the string form accepted by the `labelSelector` list parameter.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::{ensure, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SelectorError {
    #[snafu(display("Unsupported label selector operator '{}' for key '{}'", operator, key))]
    UnsupportedOperator { key: String, operator: String },

    #[snafu(display(
        "Label selector operator '{}' for key '{}' requires at least one value",
        operator,
        key
    ))]
    MissingValues { key: String, operator: String },
}

/// Renders `matchLabels` and `matchExpressions` as a comma separated (ANDed) list of requirements.
///
/// An empty selector renders as the empty string, which the API treats as "select everything".
pub fn render_label_selector(selector: &LabelSelector) -> Result<String, SelectorError> {
    let mut requirements: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    for expression in selector.match_expressions.iter().flatten() {
        requirements.push(render_expression(expression)?);
    }

    Ok(requirements.join(","))
}

fn render_expression(requirement: &LabelSelectorRequirement) -> Result<String, SelectorError> {
    let key = requirement.key.as_str();
    let values = requirement.values.as_deref().unwrap_or_default();
    match requirement.operator.as_str() {
        op @ ("In" | "NotIn") => {
            ensure!(
                !values.is_empty(),
                MissingValuesSnafu {
                    key,
                    operator: op
                }
            );
            let set_operator = if op == "In" { "in" } else { "notin" };
            Ok(format!("{} {} ({})", key, set_operator, values.join(",")))
        }
        "Exists" => Ok(key.to_string()),
        "DoesNotExist" => Ok(format!("!{}", key)),
        op => UnsupportedOperatorSnafu { key, operator: op }.fail(),
    }
}
