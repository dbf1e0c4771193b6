use crate::config::{EffectivePolicy, GlobalPolicy, RouteOverride};

/// Resolve a `RouteOverride` against the `GlobalPolicy` it sits on top of.
///
/// Tri-valued booleans resolve via `TriBool::resolve`. List fields are
/// additive: global entries first, then the override's own, duplicates
/// retained. `test_probability == 0` on the override means "inherit" —
/// operators use `skip_routes` to actually disable testing for a route.
pub fn resolve(global: &GlobalPolicy, over: &RouteOverride) -> EffectivePolicy {
    let mut skip_headers = global.skip_headers.clone();
    skip_headers.extend(over.skip_headers.iter().cloned());

    let mut skip_json_paths = global.skip_json_paths.clone();
    skip_json_paths.extend(over.skip_json_paths.iter().cloned());

    let test_probability = if over.test_probability == 0 {
        global.test_probability
    } else {
        over.test_probability
    };

    EffectivePolicy {
        compare_headers: over.compare_headers.resolve(global.compare_headers),
        skip_headers,
        store_req_body: over.store_req_body.resolve(global.store_req_body),
        store_resp_bodies: over.store_resp_bodies.resolve(global.store_resp_bodies),
        skip_json_paths,
        test_probability,
        max_body_bytes: global.max_body_bytes,
    }
}
