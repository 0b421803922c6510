//! Scheduling-shape summaries rendered as `;`-terminated text.

use std::fmt::Write;

use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use k8s_openapi::api::core::v1::PodAffinityTerm;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::domain::records::PodRecord;

pub(super) fn apply(spec: &PodSpec, record: &mut PodRecord) {
    record.priority = spec.priority.unwrap_or(0);
    record.service_account_name = spec.service_account_name.clone().unwrap_or_default();
    record.termination_grace_period_seconds = spec.termination_grace_period_seconds.unwrap_or(0);
    record.restart_policy = spec.restart_policy.clone().unwrap_or_default();
    record.has_active_deadline = spec.active_deadline_seconds.is_some();
    record.tolerations = join(spec.tolerations.iter().flatten().map(toleration));

    let Some(affinity) = spec.affinity.as_ref() else {
        return;
    };

    if let Some(node) = &affinity.node_affinity {
        record.node_affinity_preferred = join(
            node.preferred_during_scheduling_ignored_during_execution
                .iter()
                .flatten()
                .map(|term| {
                    let requirements = term
                        .preference
                        .match_expressions
                        .iter()
                        .chain(term.preference.match_fields.iter())
                        .flatten()
                        .map(requirement)
                        .collect::<Vec<_>>()
                        .join(",");
                    format!("{} {requirements}", term.weight)
                }),
        );
        record.node_affinity_required = join(
            node.required_during_scheduling_ignored_during_execution
                .iter()
                .flat_map(|selector| selector.node_selector_terms.iter())
                .flat_map(|term| {
                    term.match_expressions
                        .iter()
                        .chain(term.match_fields.iter())
                        .flatten()
                })
                .map(requirement),
        );
    }

    if let Some(pod) = &affinity.pod_affinity {
        record.pod_affinity_preferred = join(
            pod.preferred_during_scheduling_ignored_during_execution
                .iter()
                .flatten()
                .map(|term| format!("{} {}", term.weight, affinity_term(&term.pod_affinity_term))),
        );
        record.pod_affinity_required = join(
            pod.required_during_scheduling_ignored_during_execution
                .iter()
                .flatten()
                .map(affinity_term),
        );
    }

    if let Some(anti) = &affinity.pod_anti_affinity {
        record.pod_anti_affinity_preferred = join(
            anti.preferred_during_scheduling_ignored_during_execution
                .iter()
                .flatten()
                .map(|term| format!("{} {}", term.weight, affinity_term(&term.pod_affinity_term))),
        );
        record.pod_anti_affinity_required = join(
            anti.required_during_scheduling_ignored_during_execution
                .iter()
                .flatten()
                .map(affinity_term),
        );
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.fold(String::new(), |mut out, item| {
        let _ = write!(out, "{item};");
        out
    })
}

fn toleration(toleration: &Toleration) -> String {
    let mut out = toleration.key.clone().unwrap_or_default();
    if let Some(operator) = &toleration.operator {
        let _ = write!(out, " {operator}");
    }
    if let Some(value) = toleration.value.as_deref().filter(|value| !value.is_empty()) {
        let _ = write!(out, " {value}");
    }
    if let Some(effect) = toleration.effect.as_deref().filter(|effect| !effect.is_empty()) {
        let _ = write!(out, " :{effect}");
    }
    if let Some(seconds) = toleration.toleration_seconds {
        let _ = write!(out, " {seconds}s");
    }
    out.trim().to_string()
}

fn requirement(requirement: &NodeSelectorRequirement) -> String {
    let values = requirement.values.clone().unwrap_or_default().join(",");
    format!("{} {} [{values}]", requirement.key, requirement.operator)
}

fn affinity_term(term: &PodAffinityTerm) -> String {
    let namespaces = term.namespaces.clone().unwrap_or_default().join(",");
    let selector = term
        .label_selector
        .as_ref()
        .map(label_selector)
        .unwrap_or_default();
    format!("{} {{{selector}}} [{namespaces}]", term.topology_key)
}

fn label_selector(selector: &LabelSelector) -> String {
    let labels = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{key}={value}"));
    let expressions = selector.match_expressions.iter().flatten().map(|expression| {
        let values = expression.values.clone().unwrap_or_default().join(",");
        format!("{} {} [{values}]", expression.key, expression.operator)
    });
    labels.chain(expressions).collect::<Vec<_>>().join(",")
}
