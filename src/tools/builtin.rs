use super::ToolRegistry;
use super::expr;
use schemars::JsonSchema;
use serde::Deserialize;

/// Arguments for tools that take none.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// The city to get weather for
    pub city: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CalculateArgs {
    /// A mathematical expression to evaluate, e.g., '2 + 2'
    pub expression: String,
}

#[must_use]
pub fn get_current_time() -> String {
    format!("The current time is {}", chrono::Local::now().format("%I:%M %p"))
}

#[must_use]
pub fn get_weather(city: &str) -> String {
    format!("The weather in {city} is sunny and 72°F (22°C).")
}

/// Evaluate `expression`; failures come back as a sentence, never as an error.
#[must_use]
pub fn calculate(expression: &str) -> String {
    match expr::evaluate(expression) {
        Ok(result) => format!("The result of {expression} is {result}"),
        Err(err) => {
            tracing::debug!(%expression, error = %err, "calculation failed");
            format!("I couldn't calculate that expression: {err}")
        }
    }
}

/// Registry holding the clock, weather and calculator tools.
#[must_use]
pub fn builtin_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.tool_with_description(
        "get_current_time",
        "Get the current time. Use this when the user asks what time it is.",
        |_: NoArgs| async move { Ok(get_current_time()) },
    );
    registry.tool_with_description(
        "get_weather",
        "Get the weather for a specific city. Use this when the user asks about weather.",
        |args: WeatherArgs| async move { Ok(get_weather(&args.city)) },
    );
    registry.tool_with_description(
        "calculate",
        "Calculate a mathematical expression. Use this when the user asks for calculations.",
        |args: CalculateArgs| async move { Ok(calculate(&args.expression)) },
    );
    registry
}
