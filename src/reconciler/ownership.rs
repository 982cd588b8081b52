//! Ownership Tagger
//!
//! Children carry exactly one controller owner reference back to their
//! collector. The cluster garbage collector uses it for cascade deletion; the
//! engine uses it to decide which objects it may touch.

use crate::crd::TelemetryCollector;
use crate::domain::ports::ChildObject;
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

/// Controller owner reference pointing at a collector
pub fn owner_reference(instance: &TelemetryCollector) -> Result<OwnerReference> {
    instance
        .controller_owner_ref(&())
        .ok_or_else(|| Error::Validation {
            namespace: instance.namespace().to_string(),
            name: instance.name().to_string(),
            reason: "cannot reference a collector without uid".to_string(),
        })
}

/// The controller-flagged owner reference of an object, if any
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|reference| reference.controller == Some(true))
}

/// Whether the object's controller is the owner with the given uid
pub fn is_controlled_by(object: &ChildObject, owner_uid: &str) -> bool {
    controller_of(object.meta()).is_some_and(|reference| reference.uid == owner_uid)
}

/// Attach `owner` as the controller of `object`
///
/// Re-tagging with the same owner is a no-op. An object already controlled
/// by someone else is rejected.
pub fn tag(mut object: ChildObject, owner: &OwnerReference) -> Result<ChildObject> {
    if let Some(current) = controller_of(object.meta()) {
        if current.uid == owner.uid {
            return Ok(object);
        }
        return Err(Error::AlreadyOwned {
            kind: object.kind(),
            name: object.name().to_string(),
            owner: format!("{}/{}", current.kind, current.name),
        });
    }

    object
        .meta_mut()
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(owner.clone());
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TelemetryCollectorSpec;
    use crate::domain::ports::ChildKind;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn instance(uid: &str) -> TelemetryCollector {
        let mut instance = TelemetryCollector::new("my-col", TelemetryCollectorSpec::default());
        instance.metadata.namespace = Some("observability".into());
        instance.metadata.uid = Some(uid.into());
        instance
    }

    fn blob() -> ChildObject {
        ChildObject::ConfigBlob(ConfigMap {
            metadata: ObjectMeta {
                name: Some("my-col-collector".into()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_owner_reference_is_controller() {
        let reference = owner_reference(&instance("uid-1")).unwrap();

        assert_eq!(reference.kind, "TelemetryCollector");
        assert_eq!(reference.api_version, "telemetry.collector-operator.io/v1alpha1");
        assert_eq!(reference.name, "my-col");
        assert_eq!(reference.uid, "uid-1");
        assert_eq!(reference.controller, Some(true));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut without_uid = instance("uid-1");
        without_uid.metadata.uid = None;
        assert_matches!(owner_reference(&without_uid), Err(Error::Validation { .. }));
    }

    #[test]
    fn test_tag_adds_exactly_one_reference() {
        let owner = owner_reference(&instance("uid-1")).unwrap();

        let tagged = tag(blob(), &owner).unwrap();
        let retagged = tag(tagged.clone(), &owner).unwrap();

        assert_eq!(tagged.meta().owner_references.as_ref().unwrap().len(), 1);
        assert_eq!(retagged, tagged);
        assert!(is_controlled_by(&tagged, "uid-1"));
        assert!(!is_controlled_by(&tagged, "uid-2"));
    }

    #[test]
    fn test_second_controller_is_rejected() {
        let first = owner_reference(&instance("uid-1")).unwrap();
        let second = owner_reference(&instance("uid-2")).unwrap();

        let tagged = tag(blob(), &first).unwrap();
        assert_matches!(
            tag(tagged, &second),
            Err(Error::AlreadyOwned { kind: ChildKind::ConfigBlob, .. })
        );
    }

    #[test]
    fn test_non_controller_references_are_kept() {
        let mut object = blob();
        object.meta_mut().owner_references = Some(vec![OwnerReference {
            api_version: "v1".into(),
            kind: "Namespace".into(),
            name: "observability".into(),
            uid: "ns-uid".into(),
            ..Default::default()
        }]);

        let owner = owner_reference(&instance("uid-1")).unwrap();
        let tagged = tag(object, &owner).unwrap();

        assert_eq!(tagged.meta().owner_references.as_ref().unwrap().len(), 2);
        assert!(is_controlled_by(&tagged, "uid-1"));
    }
}
