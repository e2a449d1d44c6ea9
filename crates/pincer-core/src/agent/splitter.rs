//! The Policy Splitter. Component C.
//!
//! Pure decision logic plus one I/O lookup (the per-thread domain-grant
//! check) — no events are emitted here; the caller (the Turn Orchestrator)
//! emits `ToolCallPlanned` for every call in split order so the event's
//! `risk_class` reflects any promotion this module makes.

use serde_json::Value;

use crate::domain::RiskClass;
use crate::storage::DomainGrantStore;

/// Tool names treated as "a URL-consuming read" for rule 2.
/// Concrete tool implementations are a collaborator; this is
/// the closed set of names the splitter recognizes by convention.
const URL_CONSUMING_TOOLS: &[&str] = &["web_fetch", "fetch_url", "http_get"];

/// One planner-proposed tool call, already assigned a stable
/// `tool_call_id` by the orchestrator.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub tool_call_id: String,
    pub tool: String,
    pub args: Value,
    pub risk_class: RiskClass,
    pub justification: String,
}

#[derive(Debug, Default)]
pub struct SplitOutput {
    pub inline_reads: Vec<PlannedCall>,
    pub approval_required: Vec<PlannedCall>,
    /// Reserved for future policy rules; always empty in the base spec
    ///.
    pub blocked: Vec<PlannedCall>,
}

/// One call's classification, in input order, for `ToolCallPlanned` emission.
pub struct Classified {
    pub call: PlannedCall,
    pub decision: crate::domain::PolicyDecision,
}

pub struct PolicySplitter<'a> {
    domain_grants: &'a DomainGrantStore<'a>,
}

impl<'a> PolicySplitter<'a> {
    pub fn new(domain_grants: &'a DomainGrantStore<'a>) -> Self {
        Self { domain_grants }
    }

    /// Classify a planner round's ordered tool calls. Returns
    /// both the split lists and a flat, input-ordered `Classified` sequence
    /// for the caller to emit `ToolCallPlanned` events from.
    pub fn split(
        &self,
        thread_id: &str,
        calls: Vec<(String, String, Value, RiskClass)>,
    ) -> anyhow::Result<(SplitOutput, Vec<Classified>)> {
        let mut output = SplitOutput::default();
        let mut classified = Vec::with_capacity(calls.len());

        for (tool_call_id, tool, args, risk_class) in calls {
            // Rule 1: anything not READ is approval-gated.
            if risk_class != RiskClass::Read {
                let call = PlannedCall {
                    tool_call_id,
                    tool,
                    args,
                    risk_class,
                    justification: "non-read risk class requires approval".to_string(),
                };
                classified.push(Classified {
                    call: call.clone(),
                    decision: crate::domain::PolicyDecision::RequireApproval,
                });
                output.approval_required.push(call);
                continue;
            }

            // Rule 2: URL-consuming reads need a per-thread domain grant.
            if is_url_consuming(&tool) {
                if let Some(domain) = extract_domain(&args) {
                    let granted = self.domain_grants.is_granted(thread_id, &domain)?;
                    if !granted {
                        let call = PlannedCall {
                            tool_call_id,
                            tool,
                            args,
                            risk_class: RiskClass::Exfiltration,
                            justification: format!(
                                "first fetch of domain '{domain}' for this thread requires approval"
                            ),
                        };
                        classified.push(Classified {
                            call: call.clone(),
                            decision: crate::domain::PolicyDecision::RequireApproval,
                        });
                        output.approval_required.push(call);
                        continue;
                    }
                }
            }

            // Rule 3: everything else is an inline read.
            let call = PlannedCall {
                tool_call_id,
                tool,
                args,
                risk_class,
                justification: String::new(),
            };
            classified.push(Classified {
                call: call.clone(),
                decision: crate::domain::PolicyDecision::InlineRead,
            });
            output.inline_reads.push(call);
        }

        Ok((output, classified))
    }
}

impl Clone for PlannedCall {
    fn clone(&self) -> Self {
        Self {
            tool_call_id: self.tool_call_id.clone(),
            tool: self.tool.clone(),
            args: self.args.clone(),
            risk_class: self.risk_class,
            justification: self.justification.clone(),
        }
    }
}

fn is_url_consuming(tool: &str) -> bool {
    URL_CONSUMING_TOOLS.contains(&tool)
}

/// Extract the registrable domain (host) from a `url` argument. Returns
/// `None` if the call has no parseable URL — such calls fall through to
/// rule 3 as an ordinary inline read, since the exfiltration risk this rule
/// guards against only exists for calls that actually name a remote host.
fn extract_domain(args: &Value) -> Option<String> {
    let url_str = args.get("url").and_then(Value::as_str)?;
    let parsed = url::Url::parse(url_str).ok()?;
    parsed.host_str().map(str::to_string)
}
