use forma_core::commands::CommandType;
use forma_core::workout::Exercise;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::engine::provider::ActionChoice;

/// Static declaration of one action the provider may choose.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    /// Human-readable progress label streamed when the action starts
    pub status_label: Option<&'static str>,
    /// Exactly one action in the registry is terminal; choosing it ends
    /// the turn.
    pub terminal: bool,
}

/// A chosen action with validated, typed arguments. Malformed or unknown
/// shapes never reach an executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    SendMessage {
        text: String,
    },
    CreateWorkout {
        title: String,
        exercises: Vec<Exercise>,
        notes: Option<String>,
    },
    UpdateWorkout {
        expected_version: i64,
        command: CommandType,
    },
    CompleteWorkout {
        expected_version: i64,
    },
    Idle,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SendMessageArgs {
    text: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateWorkoutArgs {
    title: String,
    exercises: Vec<Exercise>,
    #[serde(default)]
    notes: Option<String>,
}

// deny_unknown_fields cannot combine with flatten; the tagged CommandType
// enum still rejects unknown command_type values and shapes.
#[derive(Deserialize)]
struct UpdateWorkoutArgs {
    expected_version: i64,
    #[serde(flatten)]
    command: CommandType,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CompleteWorkoutArgs {
    expected_version: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IdleArgs {}

/// The action vocabulary. Immutable at runtime; owned by the control loop.
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// The coaching vocabulary: talk, create, edit, finish, stop.
    pub fn coaching() -> Self {
        let exercise_schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "sets": { "type": "integer", "minimum": 1 },
                "reps": { "type": "integer", "minimum": 1 },
                "weight_kg": { "type": "number" },
                "done": { "type": "boolean" }
            },
            "required": ["name", "sets", "reps"]
        });

        let defs = vec![
            ToolDefinition {
                name: "send_message",
                description: "Send a short coaching message to the athlete. \
                              This is the only way the athlete sees text from you.",
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
                status_label: Some("Replying"),
                terminal: false,
            },
            ToolDefinition {
                name: "create_workout",
                description: "Create a new workout session for the athlete and \
                              attach it to this conversation. Use only when no \
                              workout session is linked yet.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "exercises": { "type": "array", "items": exercise_schema.clone() },
                        "notes": { "type": "string" }
                    },
                    "required": ["title", "exercises"]
                }),
                status_label: Some("Building your workout"),
                terminal: false,
            },
            ToolDefinition {
                name: "update_workout",
                description: "Edit the linked workout session with one command. \
                              Pass the payload_version you last saw as expected_version; \
                              a conflict result means someone edited concurrently — \
                              re-read the current version from the result and retry.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "expected_version": { "type": "integer" },
                        "command_type": {
                            "type": "string",
                            "enum": [
                                "swap_exercise", "add_exercise", "remove_exercise",
                                "update_exercise", "mark_exercise_done",
                                "complete_session", "stop_session"
                            ]
                        },
                        "index": { "type": "integer", "minimum": 0 },
                        "new_exercise": exercise_schema.clone(),
                        "exercise": exercise_schema,
                        "position": { "type": "integer", "minimum": 0 },
                        "sets": { "type": "integer", "minimum": 1 },
                        "reps": { "type": "integer", "minimum": 1 },
                        "weight_kg": { "type": "number" },
                        "done": { "type": "boolean" }
                    },
                    "required": ["expected_version", "command_type"]
                }),
                status_label: Some("Updating your workout"),
                terminal: false,
            },
            ToolDefinition {
                name: "complete_workout",
                description: "Mark the linked workout session as completed. \
                              Follow up with send_message to confirm, then idle.",
                input_schema: json!({
                    "type": "object",
                    "properties": { "expected_version": { "type": "integer" } },
                    "required": ["expected_version"]
                }),
                status_label: Some("Wrapping up"),
                terminal: false,
            },
            ToolDefinition {
                name: "idle",
                description: "Nothing left to do this turn. Always finish with this.",
                input_schema: json!({ "type": "object", "properties": {} }),
                status_label: None,
                terminal: true,
            },
        ];

        Self { defs }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// Validate a provider choice into a typed invocation. Errors here are
    /// protocol violations — the provider picked outside the declared
    /// vocabulary or sent arguments that do not match the schema.
    pub fn parse(&self, choice: &ActionChoice) -> Result<ToolInvocation, String> {
        let def = self
            .get(&choice.tool)
            .ok_or_else(|| format!("unknown tool '{}'", choice.tool))?;

        let args = choice.arguments.clone();
        let invocation = match def.name {
            "send_message" => {
                let args: SendMessageArgs = parse_args(def.name, args)?;
                ToolInvocation::SendMessage { text: args.text }
            }
            "create_workout" => {
                let args: CreateWorkoutArgs = parse_args(def.name, args)?;
                ToolInvocation::CreateWorkout {
                    title: args.title,
                    exercises: args.exercises,
                    notes: args.notes,
                }
            }
            "update_workout" => {
                let args: UpdateWorkoutArgs = parse_args(def.name, args)?;
                ToolInvocation::UpdateWorkout {
                    expected_version: args.expected_version,
                    command: args.command,
                }
            }
            "complete_workout" => {
                let args: CompleteWorkoutArgs = parse_args(def.name, args)?;
                ToolInvocation::CompleteWorkout {
                    expected_version: args.expected_version,
                }
            }
            "idle" => {
                let _: IdleArgs = parse_args(def.name, args)?;
                ToolInvocation::Idle
            }
            other => return Err(format!("tool '{other}' has no executor")),
        };
        Ok(invocation)
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for '{tool}': {e}"))
}
