//! Shared setup for the bridge integration tests.

use std::rc::Rc;

use dualheap_bridge::{BridgeConfig, BridgeContext, Interp};
use dualheap_sim::SimRuntime;

pub fn setup() -> (Rc<SimRuntime>, BridgeContext) {
    setup_with(BridgeConfig::default())
}

#[allow(dead_code)]
pub fn setup_with(config: BridgeConfig) -> (Rc<SimRuntime>, BridgeContext) {
    let rt = Rc::new(SimRuntime::new());
    let ctx = BridgeContext::initialize(rt.clone(), Rc::new(Interp::new()), config)
        .expect("bridge context should initialize against the simulated runtime");
    (rt, ctx)
}
