//! Tool registry offered to the reasoning model.
//!
//! The registry is a pure function of the resolved [`ProviderConfig`]:
//! the two host tools are always present, the `gateway_*` family exists
//! exactly when the gateway credential resolved. No tool is ever added
//! or removed mid-session.

use serde_json::json;
use strum::IntoEnumIterator;

use crate::credentials::ProviderConfig;
use crate::gateway::GatewayOp;
use crate::models::tool::Tool;

pub const TOOL_RUN_HOST_COMMAND: &str = "run_host_command";
pub const TOOL_CAPTURE_SNAPSHOT: &str = "capture_snapshot";

/// What executing a tool actually does. Closed set; the session loop
/// dispatches on this, never on tool-name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCapability {
    /// Execute one viewer command on the host thread.
    HostCommand,
    /// Capture a render snapshot plus a state summary.
    HostSnapshot,
    /// Call one fixed gateway endpoint.
    GatewayCall(GatewayOp),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub tool: Tool,
    pub capability: ToolCapability,
}

pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Deterministic construction from a config snapshot: equal configs
    /// produce registries with identical tool lists, in a fixed order.
    pub fn build(config: &ProviderConfig) -> Self {
        let mut tools = vec![
            ToolDescriptor {
                tool: host_command_tool(),
                capability: ToolCapability::HostCommand,
            },
            ToolDescriptor {
                tool: snapshot_tool(),
                capability: ToolCapability::HostSnapshot,
            },
        ];
        if config.gateway_enabled() {
            for op in GatewayOp::iter() {
                tools.push(ToolDescriptor {
                    tool: gateway_tool(op),
                    capability: ToolCapability::GatewayCall(op),
                });
            }
        }
        Self { tools }
    }

    /// Tool definitions in registry order, for the model request.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|d| d.tool.clone()).collect()
    }

    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|d| d.tool.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|d| d.tool.name.as_str()).collect()
    }
}

fn host_command_tool() -> Tool {
    Tool::new(
        TOOL_RUN_HOST_COMMAND,
        "Execute a single viewer command against the live session and return its \
         feedback. Failed commands report their error in the result; issue one \
         command per call.",
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The viewer command to execute, e.g. 'fetch 1ubq' or 'show cartoon'"
                },
                "rationale": {
                    "type": "string",
                    "description": "One short sentence on why this command is being run"
                }
            }
        }),
    )
}

fn snapshot_tool() -> Tool {
    Tool::new(
        TOOL_CAPTURE_SNAPSHOT,
        "Capture a PNG snapshot of the current viewport together with a summary of \
         loaded objects and selections. Use it to verify that previous commands had \
         the intended visual effect.",
        json!({
            "type": "object",
            "required": [],
            "properties": {
                "purpose": {
                    "type": "string",
                    "description": "What the snapshot is meant to confirm"
                }
            }
        }),
    )
}

fn gateway_tool(op: GatewayOp) -> Tool {
    let (description, parameters) = match op {
        GatewayOp::Health => (
            "Check that the biology-data gateway is reachable and healthy.",
            json!({"type": "object", "required": [], "properties": {}}),
        ),
        GatewayOp::ListTools => (
            "List tools available on the biology-data gateway, optionally filtered \
             by category.",
            json!({
                "type": "object",
                "required": [],
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of tools to return"},
                    "offset": {"type": "integer", "description": "Pagination offset"},
                    "category": {"type": "string", "description": "Restrict to one category"}
                }
            }),
        ),
        GatewayOp::SearchTools => (
            "Search gateway tools by free-text query over names and descriptions.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "Search text"}
                }
            }),
        ),
        GatewayOp::ListCategories => (
            "List the tool categories the gateway exposes.",
            json!({"type": "object", "required": [], "properties": {}}),
        ),
        GatewayOp::GetCategory => (
            "Describe one gateway tool category and the tools it contains.",
            json!({
                "type": "object",
                "required": ["category_name"],
                "properties": {
                    "category_name": {"type": "string", "description": "Category to describe"}
                }
            }),
        ),
        GatewayOp::GetToolSchema => (
            "Fetch the full parameter schema for one gateway tool. Call this before \
             invoking a tool you have not used in this session.",
            json!({
                "type": "object",
                "required": ["tool_name"],
                "properties": {
                    "tool_name": {"type": "string", "description": "Gateway tool to describe"}
                }
            }),
        ),
        GatewayOp::ValidateParams => (
            "Validate a parameter object against a gateway tool's schema without \
             running the tool.",
            json!({
                "type": "object",
                "required": ["tool_name"],
                "properties": {
                    "tool_name": {"type": "string", "description": "Gateway tool to validate against"},
                    "params": {"type": "object", "description": "Parameters to validate"}
                }
            }),
        ),
        GatewayOp::InvokeTool => (
            "Invoke a gateway tool. Long-running tools return a job id to poll with \
             the job tools. Local input files are uploaded from paths inside the \
             working directory.",
            json!({
                "type": "object",
                "required": ["tool_name"],
                "properties": {
                    "tool_name": {"type": "string", "description": "Gateway tool to run"},
                    "params": {"type": "object", "description": "Tool parameters"},
                    "upload_files": {
                        "type": "array",
                        "description": "Relative paths of local files to upload with the request",
                        "items": {"type": "string"}
                    }
                }
            }),
        ),
        GatewayOp::ListJobs => (
            "List previously submitted gateway jobs.",
            json!({
                "type": "object",
                "required": [],
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of jobs to return"},
                    "offset": {"type": "integer", "description": "Pagination offset"},
                    "status": {"type": "string", "description": "Filter by job status"},
                    "tool": {"type": "string", "description": "Filter by tool name"},
                    "compact": {"type": "boolean", "description": "Return abbreviated records"}
                }
            }),
        ),
        GatewayOp::GetJobStatus => (
            "Poll the status of one gateway job.",
            json!({
                "type": "object",
                "required": ["job_id"],
                "properties": {
                    "job_id": {"type": "string", "description": "Job to poll"}
                }
            }),
        ),
        GatewayOp::GetJobResult => (
            "Fetch the full result payload of a completed gateway job.",
            json!({
                "type": "object",
                "required": ["job_id"],
                "properties": {
                    "job_id": {"type": "string", "description": "Job to fetch"}
                }
            }),
        ),
        GatewayOp::GetJobLogs => (
            "Fetch execution logs for a gateway job, useful when a job failed.",
            json!({
                "type": "object",
                "required": ["job_id"],
                "properties": {
                    "job_id": {"type": "string", "description": "Job whose logs to fetch"}
                }
            }),
        ),
    };
    Tool::new(op.tool_name(), description, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, KeySource, ProviderKind, Secret};

    fn config(with_gateway: bool) -> ProviderConfig {
        ProviderConfig {
            routing: Credential {
                provider: ProviderKind::OpenRouter,
                value: Some(Secret::new("sk-or-v1-test")),
                source: KeySource::Environment,
            },
            gateway: Credential {
                provider: ProviderKind::OpenBio,
                value: with_gateway.then(|| Secret::new("ob-test")),
                source: if with_gateway {
                    KeySource::Environment
                } else {
                    KeySource::Unset
                },
            },
            gateway_base_url: "https://api.openbio.tech".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            disabled: false,
            store_available: true,
        }
    }

    #[test]
    fn host_tools_are_always_present() {
        let registry = ToolRegistry::build(&config(false));
        assert_eq!(
            registry.names(),
            vec![TOOL_RUN_HOST_COMMAND, TOOL_CAPTURE_SNAPSHOT]
        );
    }

    #[test]
    fn gateway_family_exists_iff_credential_present() {
        let without = ToolRegistry::build(&config(false));
        assert!(!without.names().iter().any(|n| n.starts_with("gateway_")));

        let with = ToolRegistry::build(&config(true));
        let gateway_names: Vec<&str> = with
            .names()
            .into_iter()
            .filter(|n| n.starts_with("gateway_"))
            .collect();
        assert_eq!(gateway_names.len(), 12);
        assert_eq!(with.names().len(), 14);
    }

    #[test]
    fn build_is_deterministic_for_equal_configs() {
        let a = ToolRegistry::build(&config(true));
        let b = ToolRegistry::build(&config(true));
        assert_eq!(a.tools(), b.tools());
    }

    #[test]
    fn resolve_maps_names_to_capabilities() {
        let registry = ToolRegistry::build(&config(true));
        assert_eq!(
            registry.resolve(TOOL_RUN_HOST_COMMAND).unwrap().capability,
            ToolCapability::HostCommand
        );
        assert_eq!(
            registry.resolve(TOOL_CAPTURE_SNAPSHOT).unwrap().capability,
            ToolCapability::HostSnapshot
        );
        assert_eq!(
            registry.resolve("gateway_search_tools").unwrap().capability,
            ToolCapability::GatewayCall(GatewayOp::SearchTools)
        );
        assert!(registry.resolve("write_file").is_none());
    }

    #[test]
    fn every_tool_schema_is_an_object() {
        let registry = ToolRegistry::build(&config(true));
        for tool in registry.tools() {
            assert_eq!(tool.parameters["type"], "object", "tool {}", tool.name);
            assert!(tool.parameters["properties"].is_object());
        }
    }
}
