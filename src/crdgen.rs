use extension_driver::apis::{
    containerruntime::ContainerRuntime, controlplane::ControlPlane, infrastructure::Infrastructure,
    shoot_state::ShootState,
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        Infrastructure::crd(),
        ControlPlane::crd(),
        ContainerRuntime::crd(),
        ShootState::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
