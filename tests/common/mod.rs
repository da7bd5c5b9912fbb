#![allow(dead_code)]

use greenlight::config::StackManifest;
use greenlight::plan::StartupPlan;
use greenlight::registry::ServiceRegistry;
use std::path::PathBuf;

pub fn fixture_manifest_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/greenlight-stack.yaml")
}

pub fn load_stack_manifest() -> StackManifest {
    StackManifest::from_path(fixture_manifest_path()).expect("stack manifest should load")
}

pub fn resolved_fixture_plan() -> (ServiceRegistry, StartupPlan) {
    let manifest = load_stack_manifest();
    let registry =
        ServiceRegistry::from_specs(manifest.services).expect("fixture services should register");
    let plan = StartupPlan::resolve(&registry).expect("fixture plan should resolve");
    (registry, plan)
}
