//! Per-container resource, probe, port and dependency checks.

use std::fmt::Write;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::Pod;

use crate::domain::caches::cache_key;
use crate::domain::caches::CorrelationCaches;
use crate::domain::caches::ServiceEntry;
use crate::domain::quantity;
use crate::domain::records::ContainerPortRecord;
use crate::domain::records::ContainerRecord;
use crate::domain::records::PodRecord;

/// Builds the container record and adds its figures onto the pod record.
pub(super) fn process_container(
    pod: &Pod,
    record: &mut PodRecord,
    container: &Container,
    init: bool,
    services: &[ServiceEntry],
    caches: &CorrelationCaches,
) -> ContainerRecord {
    let mut out = ContainerRecord {
        name: container.name.clone(),
        namespace: record.namespace.clone(),
        node_name: record.node_name.clone(),
        pod_name: record.name.clone(),
        init,
        pod_init_time_millis: record.start_time_millis,
        image: container.image.clone().unwrap_or_default(),
        ..Default::default()
    };

    let privileged = container
        .security_context
        .as_ref()
        .and_then(|context| context.privileged)
        .unwrap_or(false);
    if privileged {
        record.num_privileged += 1;
        out.privileged = 1;
    }

    if container.liveness_probe.is_none() {
        record.live_probes += 1;
        out.live_probes = 1;
    }

    for port in container.ports.iter().flatten() {
        let checked = check_port(port, &record.name, services, caches);
        if !checked.mapped {
            let _ = write!(out.missing_services, "{};", checked.port_number);
        }
        out.container_ports.push(checked);
    }

    if container.readiness_probe.is_none() {
        record.ready_probes += 1;
        out.ready_probes = 1;
    }

    add_resources(record, &mut out, container);
    check_env_dependencies(pod, &mut out, container, caches);
    check_volumes(pod, record, &mut out, container, caches);

    out
}

/// Port is mapped when a correlated service exposes it and ready when that
/// service's endpoints list the pod on it.
pub(super) fn check_port(
    port: &ContainerPort,
    pod_name: &str,
    services: &[ServiceEntry],
    caches: &CorrelationCaches,
) -> ContainerPortRecord {
    let mut checked = ContainerPortRecord {
        port_number: port.container_port,
        name: port.name.clone().unwrap_or_default(),
        mapped: false,
        ready: false,
    };
    for service in services {
        let (mapped, ready) = service.port_status(port, pod_name, &caches.endpoints);
        checked.mapped |= mapped;
        checked.ready |= ready;
    }
    checked
}

fn add_resources(record: &mut PodRecord, out: &mut ContainerRecord, container: &Container) {
    let Some(resources) = container.resources.as_ref() else {
        return;
    };
    let requests = resources.requests.as_ref().filter(|map| !map.is_empty());
    let limits = resources.limits.as_ref().filter(|map| !map.is_empty());

    if requests.is_some() {
        out.cpu_request = quantity::resource_milli(requests, "cpu").unwrap_or(0);
        out.mem_request = quantity::resource_milli(requests, "memory").unwrap_or(0) / 1000;
        out.pod_storage_request =
            quantity::resource_milli(requests, "ephemeral-storage").unwrap_or(0) / 1000;
        record.cpu_request += out.cpu_request;
        record.mem_request += out.mem_request;
        record.pod_storage_request += out.pod_storage_request;
    }

    if limits.is_some() {
        out.cpu_limit = quantity::resource_milli(limits, "cpu").unwrap_or(0);
        out.mem_limit = quantity::resource_milli(limits, "memory").unwrap_or(0) / 1000;
        out.pod_storage_limit =
            quantity::resource_milli(limits, "ephemeral-storage").unwrap_or(0) / 1000;
        record.cpu_limit += out.cpu_limit;
        record.mem_limit += out.mem_limit;
        record.pod_storage_limit += out.pod_storage_limit;
    }

    out.limits_defined = requests.is_some() || limits.is_some();
}

fn check_env_dependencies(
    pod: &Pod,
    out: &mut ContainerRecord,
    container: &Container,
    caches: &CorrelationCaches,
) {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

    for source in container
        .env
        .iter()
        .flatten()
        .filter_map(|var| var.value_from.as_ref())
    {
        if let Some(selector) = &source.config_map_key_ref {
            let name = selector.name.as_deref().unwrap_or_default();
            if !selector.optional.unwrap_or(false)
                && !caches.config_maps.contains(&cache_key(namespace, name))
            {
                tracing::debug!(namespace = %namespace, config_map = %name, "Config map not found");
                let _ = write!(out.missing_configs, "{name};");
            }
        }
        if let Some(selector) = &source.secret_key_ref {
            let name = selector.name.as_deref().unwrap_or_default();
            if !selector.optional.unwrap_or(false)
                && !caches.secrets.contains(&cache_key(namespace, name))
            {
                let _ = write!(out.missing_secrets, "{name};");
            }
        }
    }

    for source in container.env_from.iter().flatten() {
        if let Some(reference) = &source.config_map_ref {
            let name = reference.name.as_deref().unwrap_or_default();
            if !reference.optional.unwrap_or(false)
                && !caches.config_maps.contains(&cache_key(namespace, name))
            {
                let _ = write!(out.missing_configs, "{name};");
            }
        }
        if let Some(reference) = &source.secret_ref {
            let name = reference.name.as_deref().unwrap_or_default();
            if !reference.optional.unwrap_or(false)
                && !caches.secrets.contains(&cache_key(namespace, name))
            {
                let _ = write!(out.missing_secrets, "{name};");
            }
        }
    }
}

fn check_volumes(
    pod: &Pod,
    record: &mut PodRecord,
    out: &mut ContainerRecord,
    container: &Container,
    caches: &CorrelationCaches,
) {
    let namespace = record.namespace.clone();
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref());

    for mount in container.volume_mounts.iter().flatten() {
        let _ = write!(out.mounts, "{};", mount.mount_path);

        for volume in volumes
            .into_iter()
            .flatten()
            .filter(|volume| volume.name == mount.name)
        {
            if let Some(claim) = &volume.persistent_volume_claim {
                if let Some(pvc) = caches.claims.get(&cache_key(&namespace, &claim.claim_name)) {
                    let requested = pvc
                        .spec
                        .as_ref()
                        .and_then(|spec| spec.resources.as_ref())
                        .and_then(|resources| resources.requests.as_ref());
                    if let Some(value) = quantity::resource_milli(requested, "storage") {
                        out.storage_request += value / 1000;
                        record.storage_request += value / 1000;
                    }
                    let capacity = pvc.status.as_ref().and_then(|status| status.capacity.as_ref());
                    if let Some(value) = quantity::resource_milli(capacity, "storage") {
                        out.storage_capacity += value / 1000;
                        record.storage_capacity += value / 1000;
                    }
                }
            }
            if let Some(config_map) = &volume.config_map {
                let name = config_map.name.clone().unwrap_or_default();
                if !config_map.optional.unwrap_or(false)
                    && !caches.config_maps.contains(&cache_key(&namespace, &name))
                {
                    let _ = write!(out.missing_configs, "{name};");
                }
            }
            if let Some(secret) = &volume.secret {
                let name = secret.secret_name.clone().unwrap_or_default();
                if !secret.optional.unwrap_or(false)
                    && !caches.secrets.contains(&cache_key(&namespace, &name))
                {
                    let _ = write!(out.missing_secrets, "{name};");
                }
            }
        }
    }
}
