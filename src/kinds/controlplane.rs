use crate::{
    apis::{
        controlplane::{ControlPlane, ControlPlaneSpec, Purpose},
        extension::{DefaultSpec, Extension},
    },
    driver::{Driver, ExtensionKind},
};
use k8s_openapi::{api::core::v1::SecretReference, apimachinery::pkg::runtime::RawExtension};

/// Control plane hooks of one shoot. A shoot has a normal one and may have an exposure one.
#[derive(Clone, Debug, Default)]
pub struct ControlPlaneValues {
    pub shoot_name: String,
    pub purpose: Purpose,
    pub provider_type: String,
    pub provider_config: Option<RawExtension>,
    pub region: String,
    pub secret_ref: SecretReference,
    pub infrastructure_provider_status: Option<RawExtension>,
}

impl ExtensionKind for ControlPlaneValues {
    type Object = ControlPlane;
    type Output = Option<RawExtension>;

    fn name(&self) -> String {
        match self.purpose {
            Purpose::Normal => self.shoot_name.clone(),
            Purpose::Exposure => format!("{}-exposure", self.shoot_name),
        }
    }

    fn purpose(&self) -> Option<&str> {
        Some(self.purpose.as_str())
    }

    fn spec(&self) -> ControlPlaneSpec {
        ControlPlaneSpec {
            default_spec: DefaultSpec {
                type_: self.provider_type.clone(),
                provider_config: self.provider_config.clone(),
            },
            region: self.region.clone(),
            secret_ref: self.secret_ref.clone(),
            purpose: Some(self.purpose),
            infrastructure_provider_status: self.infrastructure_provider_status.clone(),
        }
    }

    fn extract(&self, obj: &ControlPlane) -> Option<RawExtension> {
        obj.default_status().and_then(|s| s.provider_status.clone())
    }
}

impl Driver<ControlPlaneValues> {
    /// Provider status reported once the control plane became ready.
    pub fn provider_status(&self) -> Option<&RawExtension> {
        self.output().and_then(Option::as_ref)
    }
}
