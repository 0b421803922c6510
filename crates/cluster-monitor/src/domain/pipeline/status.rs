//! Pod status interpretation: last condition, container states and timing.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::config::MonitorConfig;
use crate::domain::records::ContainerRecord;
use crate::domain::records::PodRecord;
use crate::domain::records::PHASE_FAILED;
use crate::domain::traits::LogTailRequest;

/// Restart count above which a running container gets its logs tailed.
pub const RESTART_LOG_THRESHOLD: i32 = 10;

pub(super) fn millis(time: &Time) -> i64 {
    time.0.timestamp_millis()
}

/// The condition with the latest transition wins; the first one wins ties.
pub(super) fn apply_last_condition(status: &PodStatus, record: &mut PodRecord) {
    let mut latest = 0_i64;
    let mut last = None;
    for condition in status.conditions.iter().flatten() {
        let transition = condition
            .last_transition_time
            .as_ref()
            .map(millis)
            .unwrap_or(0);
        if transition > latest {
            latest = transition;
            last = Some(condition);
        }
    }

    if let Some(condition) = last {
        record.reason_condition = format!(
            "{}. {}",
            condition.reason.as_deref().unwrap_or_default(),
            condition.message.as_deref().unwrap_or_default()
        );
        record.status_condition = condition.status.clone();
        record.type_condition = condition.type_.clone();
        record.last_transition_time_condition = Some(latest);
    }
}

/// Folds container statuses into the container records and returns the log
/// tails due for crash-looping containers.
pub(super) fn fold_container_statuses(
    status: &PodStatus,
    record: &mut PodRecord,
    config: &MonitorConfig,
) -> Vec<LogTailRequest> {
    let mut log_tails = Vec::new();

    for (statuses, init) in [
        (status.container_statuses.as_ref(), false),
        (status.init_container_statuses.as_ref(), true),
    ] {
        for container_status in statuses.into_iter().flatten() {
            record.pod_restarts += i64::from(container_status.restart_count);

            let containers = if init {
                &mut record.init_containers
            } else {
                &mut record.containers
            };
            let Some(container) = fold_one(containers, container_status) else {
                continue;
            };

            let running = container_status
                .state
                .as_ref()
                .is_some_and(|state| state.running.is_some());
            if running && container.restarts > RESTART_LOG_THRESHOLD {
                log_tails.push(LogTailRequest {
                    cluster_name: record.cluster_name.clone(),
                    namespace: record.namespace.clone(),
                    pod_owner: record.owner.clone(),
                    pod_name: record.name.clone(),
                    container: container.name.clone(),
                    since_seconds: config.snapshot_sync_interval.as_secs() as i64,
                    tail_lines: config.event_api_limit as i64,
                });
            }
        }
    }

    log_tails
}

fn fold_one<'a>(
    containers: &'a mut BTreeMap<String, ContainerRecord>,
    status: &ContainerStatus,
) -> Option<&'a ContainerRecord> {
    let container = containers.get_mut(&status.name)?;
    container.restarts = status.restart_count;
    container.image = status.image.clone();

    if let Some(state) = &status.state {
        if let Some(waiting) = &state.waiting {
            container.wait_reason = waiting.reason.clone().unwrap_or_default();
        }
        if let Some(terminated) = &state.terminated {
            container.term_reason = terminated.reason.clone().unwrap_or_default();
            container.termination_time_millis =
                terminated.finished_at.as_ref().map(millis).unwrap_or(0);
        }
        if let Some(running) = &state.running {
            container.start_time_millis = running.started_at.as_ref().map(millis);
            if let Some(last) = status
                .last_state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
            {
                container.last_termination_time_millis = last.finished_at.as_ref().map(millis);
                container.exit_code = last.exit_code;
            }
        }
    }

    Some(container)
}

/// Derives running start, break point, pending time and up-time.
///
/// The first container (by name) with a running start defines the running
/// start; its previous termination, or else the pod start, is the break point.
pub(super) fn compute_timing(record: &mut PodRecord, now_millis: i64) {
    if let Some(container) = record
        .containers
        .values()
        .find(|container| container.start_time_millis.is_some())
    {
        record.running_start_time_millis = container.start_time_millis.unwrap_or(0);
        record.break_point_millis = container
            .last_termination_time_millis
            .unwrap_or(record.start_time_millis);
    }

    if record.phase == PHASE_FAILED || record.start_time_millis <= 0 {
        return;
    }

    if record.running_start_time_millis > 0 {
        record.pending_time = (record.running_start_time_millis - record.break_point_millis).max(0);
        let end = if record.termination_time_millis > 0 {
            record.termination_time_millis
        } else {
            now_millis
        };
        record.up_time_millis = (end - record.break_point_millis).max(0);
    } else {
        record.pending_time = (now_millis - record.start_time_millis).max(0);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;
    use k8s_openapi::api::core::v1::ContainerState;
    use k8s_openapi::api::core::v1::ContainerStateRunning;
    use k8s_openapi::api::core::v1::ContainerStateTerminated;
    use k8s_openapi::api::core::v1::PodCondition;

    use super::*;

    fn at(millis: i64) -> Time {
        Time(Utc.timestamp_millis_opt(millis).unwrap())
    }

    fn condition(type_: &str, transition: i64) -> PodCondition {
        PodCondition {
            type_: type_.to_string(),
            status: "True".to_string(),
            reason: Some(type_.to_string()),
            message: Some("ok".to_string()),
            last_transition_time: Some(at(transition)),
            last_probe_time: None,
        }
    }

    #[test]
    fn latest_condition_wins_and_first_wins_ties() {
        let status = PodStatus {
            conditions: Some(vec![
                condition("Initialized", 1_000),
                condition("Ready", 3_000),
                condition("ContainersReady", 3_000),
                condition("PodScheduled", 500),
            ]),
            ..Default::default()
        };
        let mut record = PodRecord::default();
        apply_last_condition(&status, &mut record);

        assert_eq!(record.type_condition, "Ready");
        assert_eq!(record.reason_condition, "Ready. ok");
        assert_eq!(record.last_transition_time_condition, Some(3_000));
    }

    fn running_status(name: &str, restarts: i32, started: i64, last_finished: Option<i64>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            image: "nginx:1.25".to_string(),
            restart_count: restarts,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning {
                    started_at: Some(at(started)),
                }),
                ..Default::default()
            }),
            last_state: last_finished.map(|finished| ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 137,
                    finished_at: Some(at(finished)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn record_with_container(name: &str) -> PodRecord {
        let mut record = PodRecord {
            name: "web-1".to_string(),
            namespace: "ns1".to_string(),
            owner: "web".to_string(),
            ..Default::default()
        };
        record.containers.insert(
            name.to_string(),
            ContainerRecord {
                name: name.to_string(),
                ..Default::default()
            },
        );
        record
    }

    #[test]
    fn crash_looping_running_container_requests_log_tail() {
        let status = PodStatus {
            container_statuses: Some(vec![running_status("app", 11, 5_000, Some(4_000))]),
            ..Default::default()
        };
        let mut record = record_with_container("app");
        let tails = fold_container_statuses(&status, &mut record, &MonitorConfig::default());

        assert_eq!(record.pod_restarts, 11);
        let container = &record.containers["app"];
        assert_eq!(container.image, "nginx:1.25");
        assert_eq!(container.start_time_millis, Some(5_000));
        assert_eq!(container.last_termination_time_millis, Some(4_000));
        assert_eq!(container.exit_code, 137);
        assert_eq!(tails.len(), 1);
        assert_eq!(tails[0].container, "app");
        assert_eq!(tails[0].since_seconds, 15);
        assert_eq!(tails[0].tail_lines, 100);
    }

    #[test]
    fn ten_restarts_do_not_trigger_log_tail() {
        let status = PodStatus {
            container_statuses: Some(vec![running_status("app", 10, 5_000, None)]),
            ..Default::default()
        };
        let mut record = record_with_container("app");
        assert!(fold_container_statuses(&status, &mut record, &MonitorConfig::default()).is_empty());
    }

    #[test]
    fn timing_uses_previous_termination_as_break_point() {
        let mut record = record_with_container("app");
        record.phase = "Running".to_string();
        record.start_time_millis = 1_000;
        if let Some(container) = record.containers.get_mut("app") {
            container.start_time_millis = Some(5_000);
            container.last_termination_time_millis = Some(4_000);
        }
        compute_timing(&mut record, 10_000);

        assert_eq!(record.running_start_time_millis, 5_000);
        assert_eq!(record.break_point_millis, 4_000);
        assert_eq!(record.pending_time, 1_000);
        assert_eq!(record.up_time_millis, 6_000);
    }

    #[test]
    fn pending_pod_accumulates_pending_time_until_now() {
        let mut record = record_with_container("app");
        record.phase = "Pending".to_string();
        record.start_time_millis = 1_000;
        compute_timing(&mut record, 4_000);
        assert_eq!(record.pending_time, 3_000);
        assert_eq!(record.up_time_millis, 0);
    }

    #[test]
    fn timing_is_never_negative() {
        let mut record = record_with_container("app");
        record.phase = "Running".to_string();
        record.start_time_millis = 9_000;
        if let Some(container) = record.containers.get_mut("app") {
            container.start_time_millis = Some(5_000);
        }
        compute_timing(&mut record, 1_000);
        assert_eq!(record.pending_time, 0);
        assert_eq!(record.up_time_millis, 0);
    }
}
