//! Tool catalogue: name, description and JSON schema for each tool.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &'static str, description: &'static str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

fn no_arguments() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn job_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "job_id": { "type": "string", "description": description }
        },
        "required": ["job_id"]
    })
}

fn template_properties() -> Value {
    json!({
        "template": { "type": "string", "description": "Template name to use" },
        "data": { "type": "object", "description": "Data to populate the template" }
    })
}

/// Definitions for every tool in [`crate::TOOL_NAMES`], same order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let mut overlay_create = template_properties();
    overlay_create["width"] =
        json!({ "type": "integer", "description": "Overlay width in pixels", "default": 1920 });
    overlay_create["height"] =
        json!({ "type": "integer", "description": "Overlay height in pixels", "default": 1080 });

    vec![
        tool(
            "audio_identify",
            "Identify audio content from a file or stream",
            json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string", "description": "Path or URL to the audio source" },
                    "duration": { "type": "integer", "description": "Duration in seconds to analyze", "default": 10 }
                },
                "required": ["source"]
            }),
        ),
        tool(
            "audio_status",
            "Get the status of an audio identification job",
            job_id_schema("The job ID to check"),
        ),
        tool(
            "image_optimize",
            "Optimize an image for display",
            json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string", "description": "Path or URL to the image" },
                    "width": { "type": "integer", "description": "Target width in pixels" },
                    "height": { "type": "integer", "description": "Target height in pixels" },
                    "format": {
                        "type": "string",
                        "description": "Output format (jpeg, png, webp)",
                        "enum": ["jpeg", "png", "webp"],
                        "default": "webp"
                    },
                    "quality": { "type": "integer", "description": "Output quality (1-100)", "default": 85 }
                },
                "required": ["source"]
            }),
        ),
        tool(
            "image_info",
            "Get metadata and info about an image",
            json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string", "description": "Path or URL to the image" }
                },
                "required": ["source"]
            }),
        ),
        tool(
            "overlay_create",
            "Create an overlay image with text and graphics",
            json!({
                "type": "object",
                "properties": overlay_create,
                "required": ["template", "data"]
            }),
        ),
        tool(
            "overlay_list_templates",
            "List available overlay templates",
            no_arguments(),
        ),
        tool(
            "overlay_preview",
            "Generate a preview of an overlay",
            json!({
                "type": "object",
                "properties": template_properties(),
                "required": ["template", "data"]
            }),
        ),
        tool(
            "dispatcher_enqueue",
            "Enqueue a display job for processing",
            json!({
                "type": "object",
                "properties": {
                    "job_type": {
                        "type": "string",
                        "description": "Type of job (image, video, slideshow)",
                        "enum": ["image", "video", "slideshow"]
                    },
                    "source": { "type": "string", "description": "Path or URL to the content" },
                    "target_device": { "type": "string", "description": "Display to render on" },
                    "priority": { "type": "integer", "description": "Job priority (higher = more urgent)", "default": 5 },
                    "options": { "type": "object", "description": "Additional job options" },
                    "idempotency_key": { "type": "string", "description": "Reuse to make retries safe" }
                },
                "required": ["job_type", "source"]
            }),
        ),
        tool(
            "dispatcher_queue_status",
            "Get the current queue status",
            no_arguments(),
        ),
        tool(
            "dispatcher_job_status",
            "Get the status of a specific job",
            job_id_schema("The job ID to check"),
        ),
        tool(
            "dispatcher_cancel",
            "Cancel a pending or running job",
            job_id_schema("The job ID to cancel"),
        ),
        tool(
            "monitor_health",
            "Check the health status of all services",
            no_arguments(),
        ),
        tool(
            "monitor_stream_status",
            "Get the current stream/display status",
            no_arguments(),
        ),
        tool(
            "monitor_failures",
            "Get recent failures and errors",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Maximum number of failures to return", "default": 10 },
                    "service": { "type": "string", "description": "Filter by service name" }
                }
            }),
        ),
        tool(
            "monitor_metrics",
            "Get system metrics and statistics",
            json!({
                "type": "object",
                "properties": {
                    "period": {
                        "type": "string",
                        "description": "Time period for metrics",
                        "enum": ["1h", "6h", "24h", "7d"],
                        "default": "1h"
                    }
                }
            }),
        ),
    ]
}
