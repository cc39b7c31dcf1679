//! Prints the Nginx CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/nginx.yaml`

use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let yaml = serde_yaml::to_string(&crds::Nginx::crd())?;
    print!("{yaml}");
    Ok(())
}
