//! Typed tool calls and the HTTP request each one maps to.

use crate::{ProxyError, Service};
use display_types::{EnqueueRequest, JobId, DEFAULT_PRIORITY};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Every tool the agent exposes, in catalogue order.
pub const TOOL_NAMES: [&str; 15] = [
    "audio_identify",
    "audio_status",
    "image_optimize",
    "image_info",
    "overlay_create",
    "overlay_list_templates",
    "overlay_preview",
    "dispatcher_enqueue",
    "dispatcher_queue_status",
    "dispatcher_job_status",
    "dispatcher_cancel",
    "monitor_health",
    "monitor_stream_status",
    "monitor_failures",
    "monitor_metrics",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    #[default]
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum MetricsPeriod {
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl MetricsPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricsPeriod::OneHour => "1h",
            MetricsPeriod::SixHours => "6h",
            MetricsPeriod::OneDay => "24h",
            MetricsPeriod::SevenDays => "7d",
        }
    }
}

fn default_duration() -> u32 {
    10
}

fn default_quality() -> u8 {
    85
}

fn default_overlay_width() -> u32 {
    1920
}

fn default_overlay_height() -> u32 {
    1080
}

fn default_failures_limit() -> u32 {
    10
}

/// One validated tool invocation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    AudioIdentify {
        source: String,
        #[serde(default = "default_duration")]
        duration: u32,
    },
    AudioStatus {
        job_id: String,
    },
    ImageOptimize {
        source: String,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        format: ImageFormat,
        #[serde(default = "default_quality")]
        quality: u8,
    },
    ImageInfo {
        source: String,
    },
    OverlayCreate {
        template: String,
        data: Map<String, Value>,
        #[serde(default = "default_overlay_width")]
        width: u32,
        #[serde(default = "default_overlay_height")]
        height: u32,
    },
    OverlayListTemplates {},
    OverlayPreview {
        template: String,
        data: Map<String, Value>,
    },
    DispatcherEnqueue(EnqueueRequest),
    DispatcherQueueStatus {},
    DispatcherJobStatus {
        job_id: JobId,
    },
    DispatcherCancel {
        job_id: JobId,
    },
    MonitorHealth {},
    MonitorStreamStatus {},
    MonitorFailures {
        #[serde(default = "default_failures_limit")]
        limit: u32,
        #[serde(default)]
        service: Option<String>,
    },
    MonitorMetrics {
        #[serde(default)]
        period: MetricsPeriod,
    },
}

/// Method, target service, path segments, query and body for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub method: Method,
    pub service: Service,
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ToolRequest {
    fn new(method: Method, service: Service, path: &[&str]) -> Self {
        Self {
            method,
            service,
            path: path.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    fn get(service: Service, path: &[&str]) -> Self {
        Self::new(Method::GET, service, path)
    }

    fn post(service: Service, path: &[&str], body: Value) -> Self {
        let mut req = Self::new(Method::POST, service, path);
        req.body = Some(body);
        req
    }

    fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

fn require_text(tool: &str, field: &str, value: &str) -> Result<(), ProxyError> {
    if value.trim().is_empty() {
        return Err(ProxyError::invalid(tool, format!("{field} must not be blank")));
    }
    Ok(())
}

fn require_positive(tool: &str, field: &str, value: u32) -> Result<(), ProxyError> {
    if value == 0 {
        return Err(ProxyError::invalid(tool, format!("{field} must be positive")));
    }
    Ok(())
}

impl ToolCall {
    /// Parse and validate a call by tool name. Missing arguments take the tool defaults.
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ProxyError> {
        if !TOOL_NAMES.contains(&name) {
            return Err(ProxyError::UnknownTool(name.to_string()));
        }
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(ProxyError::invalid(
                    name,
                    format!("arguments must be an object, got {other}"),
                ))
            }
        };
        let call: ToolCall =
            serde_json::from_value(json!({ "tool": name, "arguments": arguments }))
                .map_err(|e| ProxyError::invalid(name, e.to_string()))?;
        call.validate()?;
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::AudioIdentify { .. } => "audio_identify",
            ToolCall::AudioStatus { .. } => "audio_status",
            ToolCall::ImageOptimize { .. } => "image_optimize",
            ToolCall::ImageInfo { .. } => "image_info",
            ToolCall::OverlayCreate { .. } => "overlay_create",
            ToolCall::OverlayListTemplates {} => "overlay_list_templates",
            ToolCall::OverlayPreview { .. } => "overlay_preview",
            ToolCall::DispatcherEnqueue(_) => "dispatcher_enqueue",
            ToolCall::DispatcherQueueStatus {} => "dispatcher_queue_status",
            ToolCall::DispatcherJobStatus { .. } => "dispatcher_job_status",
            ToolCall::DispatcherCancel { .. } => "dispatcher_cancel",
            ToolCall::MonitorHealth {} => "monitor_health",
            ToolCall::MonitorStreamStatus {} => "monitor_stream_status",
            ToolCall::MonitorFailures { .. } => "monitor_failures",
            ToolCall::MonitorMetrics { .. } => "monitor_metrics",
        }
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        let tool = self.name();
        match self {
            ToolCall::AudioIdentify { source, duration } => {
                require_text(tool, "source", source)?;
                require_positive(tool, "duration", *duration)
            }
            ToolCall::AudioStatus { job_id } => require_text(tool, "job_id", job_id),
            ToolCall::ImageOptimize {
                source,
                width,
                height,
                quality,
                ..
            } => {
                require_text(tool, "source", source)?;
                if !(1..=100).contains(quality) {
                    return Err(ProxyError::invalid(tool, "quality must be within 1..=100"));
                }
                if let Some(w) = width {
                    require_positive(tool, "width", *w)?;
                }
                if let Some(h) = height {
                    require_positive(tool, "height", *h)?;
                }
                Ok(())
            }
            ToolCall::ImageInfo { source } => require_text(tool, "source", source),
            ToolCall::OverlayCreate {
                template,
                width,
                height,
                ..
            } => {
                require_text(tool, "template", template)?;
                require_positive(tool, "width", *width)?;
                require_positive(tool, "height", *height)
            }
            ToolCall::OverlayPreview { template, .. } => require_text(tool, "template", template),
            ToolCall::DispatcherEnqueue(req) => req
                .validate()
                .map_err(|e| ProxyError::invalid(tool, e.to_string())),
            ToolCall::MonitorFailures { limit, service } => {
                require_positive(tool, "limit", *limit)?;
                match service {
                    Some(s) => require_text(tool, "service", s),
                    None => Ok(()),
                }
            }
            ToolCall::OverlayListTemplates {}
            | ToolCall::DispatcherQueueStatus {}
            | ToolCall::DispatcherJobStatus { .. }
            | ToolCall::DispatcherCancel { .. }
            | ToolCall::MonitorHealth {}
            | ToolCall::MonitorStreamStatus {}
            | ToolCall::MonitorMetrics { .. } => Ok(()),
        }
    }

    /// The HTTP request this call is forwarded as.
    pub fn request(&self) -> ToolRequest {
        match self {
            ToolCall::AudioIdentify { source, duration } => ToolRequest::post(
                Service::AudioId,
                &["identify"],
                json!({ "source": source, "duration": duration }),
            ),
            ToolCall::AudioStatus { job_id } => {
                ToolRequest::get(Service::AudioId, &["status", job_id.as_str()])
            }
            ToolCall::ImageOptimize {
                source,
                width,
                height,
                format,
                quality,
            } => {
                let mut body = Map::new();
                body.insert("source".into(), json!(source));
                body.insert("format".into(), json!(format.as_str()));
                body.insert("quality".into(), json!(quality));
                if let Some(w) = width {
                    body.insert("width".into(), json!(w));
                }
                if let Some(h) = height {
                    body.insert("height".into(), json!(h));
                }
                ToolRequest::post(Service::ImageOpt, &["optimize"], Value::Object(body))
            }
            ToolCall::ImageInfo { source } => {
                ToolRequest::post(Service::ImageOpt, &["info"], json!({ "source": source }))
            }
            ToolCall::OverlayCreate {
                template,
                data,
                width,
                height,
            } => ToolRequest::post(
                Service::Overlay,
                &["create"],
                json!({ "template": template, "data": data, "width": width, "height": height }),
            ),
            ToolCall::OverlayListTemplates {} => ToolRequest::get(Service::Overlay, &["templates"]),
            ToolCall::OverlayPreview { template, data } => ToolRequest::post(
                Service::Overlay,
                &["preview"],
                json!({ "template": template, "data": data }),
            ),
            ToolCall::DispatcherEnqueue(req) => {
                let mut body = Map::new();
                body.insert("job_type".into(), json!(req.payload.job_type.as_str()));
                body.insert("source".into(), json!(req.payload.source));
                body.insert("priority".into(), json!(req.priority_or(DEFAULT_PRIORITY)));
                if let Some(ref device) = req.payload.target_device {
                    body.insert("target_device".into(), json!(device));
                }
                if let Some(ref options) = req.payload.options {
                    body.insert("options".into(), json!(options));
                }
                if let Some(ref key) = req.idempotency_key {
                    body.insert("idempotency_key".into(), json!(key));
                }
                ToolRequest::post(Service::Dispatcher, &["enqueue"], Value::Object(body))
            }
            ToolCall::DispatcherQueueStatus {} => {
                ToolRequest::get(Service::Dispatcher, &["queue", "status"])
            }
            ToolCall::DispatcherJobStatus { job_id } => {
                ToolRequest::get(Service::Dispatcher, &["job", job_id.to_string().as_str()])
            }
            ToolCall::DispatcherCancel { job_id } => ToolRequest::new(
                Method::DELETE,
                Service::Dispatcher,
                &["job", job_id.to_string().as_str()],
            ),
            ToolCall::MonitorHealth {} => ToolRequest::get(Service::Monitor, &["health"]),
            ToolCall::MonitorStreamStatus {} => {
                ToolRequest::get(Service::Monitor, &["stream", "status"])
            }
            ToolCall::MonitorFailures { limit, service } => {
                let req = ToolRequest::get(Service::Monitor, &["failures"]).query("limit", limit);
                match service {
                    Some(s) => req.query("service", s),
                    None => req,
                }
            }
            ToolCall::MonitorMetrics { period } => {
                ToolRequest::get(Service::Monitor, &["metrics"]).query("period", period.as_str())
            }
        }
    }
}
