#![no_main]

use libfuzzer_sys::fuzz_target;
use runr_types::{Event, OrchestratorState, RunState};

fuzz_target!(|data: &[u8]| {
    // Try to parse as JSON and verify serialization roundtrips for the
    // three wire-persisted types: RunState's state.json, Event's
    // timeline.jsonl lines, and OrchestratorState's state.json.
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(state) = serde_json::from_str::<RunState>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&state) {
            if let Ok(parsed) = serde_json::from_str::<RunState>(&roundtripped) {
                assert_eq!(state.run_id, parsed.run_id);
                assert_eq!(state.milestones.len(), parsed.milestones.len());
                assert_eq!(state.stop_invariant_holds(), parsed.stop_invariant_holds());
            }
        }
    }

    if let Ok(event) = serde_json::from_str::<Event>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&event) {
            if let Ok(parsed) = serde_json::from_str::<Event>(&roundtripped) {
                assert_eq!(event.seq, parsed.seq);
                assert_eq!(event.event_type, parsed.event_type);
            }
        }
    }

    if let Ok(orch) = serde_json::from_str::<OrchestratorState>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&orch) {
            if let Ok(parsed) = serde_json::from_str::<OrchestratorState>(&roundtripped) {
                assert_eq!(orch.orchestrator_id, parsed.orchestrator_id);
                assert_eq!(orch.tracks.len(), parsed.tracks.len());
            }
        }
    }
});
