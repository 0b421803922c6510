//! Event schema definitions for every record kind posted to the events API.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    Date,
}

/// Body of a schema create call: `{"schema": {"field": "type", ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDefinition {
    pub schema: BTreeMap<&'static str, FieldType>,
}

impl SchemaDefinition {
    fn from_fields(fields: &[(&'static str, FieldType)]) -> Self {
        Self {
            schema: fields.iter().copied().collect(),
        }
    }

    pub fn pods() -> Self {
        use FieldType::*;
        Self::from_fields(&[
            ("name", String),
            ("namespace", String),
            ("nodeName", String),
            ("clusterName", String),
            ("owner", String),
            ("appName", String),
            ("tierName", String),
            ("appId", Integer),
            ("tierId", Integer),
            ("nodeId", Integer),
            ("apmNodeName", String),
            ("labels", String),
            ("annotations", String),
            ("hostIp", String),
            ("podIp", String),
            ("phase", String),
            ("reason", String),
            ("isEvicted", Boolean),
            ("reasonCondition", String),
            ("statusCondition", String),
            ("typeCondition", String),
            ("lastTransitionTimeCondition", Integer),
            ("startTimeMillis", Integer),
            ("runningStartTimeMillis", Integer),
            ("terminationTimeMillis", Integer),
            ("breakPointMillis", Integer),
            ("pendingTime", Integer),
            ("upTimeMillis", Integer),
            ("containerCount", Integer),
            ("initContainerCount", Integer),
            ("numPrivileged", Integer),
            ("liveProbes", Integer),
            ("readyProbes", Integer),
            ("podRestarts", Integer),
            ("limitsDefined", Boolean),
            ("missingDependencies", Boolean),
            ("noConnectivity", Boolean),
            ("cpuRequest", Integer),
            ("cpuLimit", Integer),
            ("memRequest", Integer),
            ("memLimit", Integer),
            ("cpuUse", Integer),
            ("memUse", Integer),
            ("podStorageRequest", Integer),
            ("podStorageLimit", Integer),
            ("storageRequest", Integer),
            ("storageCapacity", Integer),
            ("priority", Integer),
            ("serviceAccountName", String),
            ("terminationGracePeriodSeconds", Integer),
            ("restartPolicy", String),
            ("hasActiveDeadline", Boolean),
            ("tolerations", String),
            ("nodeAffinityPreferred", String),
            ("nodeAffinityRequired", String),
            ("podAffinityPreferred", String),
            ("podAffinityRequired", String),
            ("podAntiAffinityPreferred", String),
            ("podAntiAffinityRequired", String),
            ("services", String),
            ("endpoints", String),
        ])
    }

    pub fn containers() -> Self {
        use FieldType::*;
        Self::from_fields(&[
            ("name", String),
            ("namespace", String),
            ("nodeName", String),
            ("podName", String),
            ("init", Boolean),
            ("podInitTimeMillis", Integer),
            ("image", String),
            ("restarts", Integer),
            ("waitReason", String),
            ("termReason", String),
            ("terminationTimeMillis", Integer),
            ("startTimeMillis", Integer),
            ("lastTerminationTimeMillis", Integer),
            ("exitCode", Integer),
            ("privileged", Integer),
            ("liveProbes", Integer),
            ("readyProbes", Integer),
            ("limitsDefined", Boolean),
            ("cpuRequest", Integer),
            ("cpuLimit", Integer),
            ("memRequest", Integer),
            ("memLimit", Integer),
            ("cpuUse", Integer),
            ("memUse", Integer),
            ("podStorageRequest", Integer),
            ("podStorageLimit", Integer),
            ("storageRequest", Integer),
            ("storageCapacity", Integer),
            ("mounts", String),
            ("containerPorts", String),
            ("missingServices", String),
            ("missingConfigs", String),
            ("missingSecrets", String),
        ])
    }

    pub fn logs() -> Self {
        use FieldType::*;
        Self::from_fields(&[
            ("clusterName", String),
            ("namespace", String),
            ("podOwner", String),
            ("podName", String),
            ("containerName", String),
            ("timestamp", Date),
            ("message", String),
            ("batchTimestamp", Integer),
        ])
    }

    pub fn endpoints() -> Self {
        use FieldType::*;
        Self::from_fields(&[
            ("name", String),
            ("namespace", String),
            ("clusterName", String),
            ("readyCount", Integer),
            ("notReadyCount", Integer),
            ("isOrphan", Boolean),
        ])
    }

    pub fn namespaces() -> Self {
        use FieldType::*;
        Self::from_fields(&[
            ("name", String),
            ("clusterName", String),
            ("status", String),
            ("quotas", Integer),
        ])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::domain::records::ContainerRecord;
    use crate::domain::records::EndpointRecord;
    use crate::domain::records::LogRecord;
    use crate::domain::records::NamespaceRecord;
    use crate::domain::records::PodRecord;

    fn fields_of(value: impl Serialize) -> Vec<std::string::String> {
        match serde_json::to_value(value).unwrap() {
            Value::Object(map) => map.keys().cloned().collect(),
            other => panic!("expected an object, got {other}"),
        }
    }

    fn assert_covers(definition: SchemaDefinition, fields: Vec<std::string::String>) {
        let declared: Vec<_> = definition.schema.keys().map(|k| k.to_string()).collect();
        let mut serialized = fields;
        serialized.sort();
        similar_asserts::assert_eq!(declared, serialized);
    }

    #[test]
    fn schemas_match_serialized_records() {
        assert_covers(SchemaDefinition::pods(), fields_of(PodRecord::default()));
        assert_covers(SchemaDefinition::containers(), fields_of(ContainerRecord::default()));
        assert_covers(SchemaDefinition::logs(), fields_of(LogRecord::default()));
        assert_covers(SchemaDefinition::endpoints(), fields_of(EndpointRecord::default()));
        assert_covers(SchemaDefinition::namespaces(), fields_of(NamespaceRecord::default()));
    }

    #[test]
    fn definition_serializes_as_schema_object() {
        let body = serde_json::to_value(SchemaDefinition::namespaces()).unwrap();
        assert_eq!(body["schema"]["quotas"], "integer");
        assert_eq!(body["schema"]["name"], "string");
    }
}
