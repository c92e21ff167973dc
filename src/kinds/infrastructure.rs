use crate::{
    apis::{
        extension::{DefaultSpec, Extension},
        infrastructure::{Infrastructure, InfrastructureSpec},
    },
    driver::{Driver, ExtensionKind},
};
use k8s_openapi::{api::core::v1::SecretReference, apimachinery::pkg::runtime::RawExtension};

/// Infrastructure of one shoot. There is exactly one, named after the shoot.
#[derive(Clone, Debug, Default)]
pub struct InfrastructureValues {
    pub shoot_name: String,
    pub provider_type: String,
    pub provider_config: Option<RawExtension>,
    pub region: String,
    pub secret_ref: SecretReference,
    pub ssh_public_key: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfrastructureOutput {
    pub provider_status: Option<RawExtension>,
    pub nodes_cidr: Option<String>,
}

impl ExtensionKind for InfrastructureValues {
    type Object = Infrastructure;
    type Output = InfrastructureOutput;

    fn name(&self) -> String {
        self.shoot_name.clone()
    }

    fn spec(&self) -> InfrastructureSpec {
        InfrastructureSpec {
            default_spec: DefaultSpec {
                type_: self.provider_type.clone(),
                provider_config: self.provider_config.clone(),
            },
            region: self.region.clone(),
            secret_ref: self.secret_ref.clone(),
            ssh_public_key: self.ssh_public_key.clone(),
        }
    }

    fn extract(&self, obj: &Infrastructure) -> InfrastructureOutput {
        InfrastructureOutput {
            provider_status: obj.default_status().and_then(|s| s.provider_status.clone()),
            nodes_cidr: obj.status.as_ref().and_then(|s| s.nodes_cidr.clone()),
        }
    }
}

impl Driver<InfrastructureValues> {
    /// Provider status reported once the infrastructure became ready.
    pub fn provider_status(&self) -> Option<&RawExtension> {
        self.output().and_then(|o| o.provider_status.as_ref())
    }

    pub fn nodes_cidr(&self) -> Option<&str> {
        self.output().and_then(|o| o.nodes_cidr.as_deref())
    }
}
