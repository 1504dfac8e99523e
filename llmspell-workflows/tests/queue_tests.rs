//! ABOUTME: Integration tests for the workflow queue's scope-stack behaviour

use llmspell_workflows::queue::{composite_step_id, Frame, FrameKind, QueueEvent, WorkflowQueue};
use llmspell_workflows::{StepDescriptor, Value};
use serde_json::json;

fn step(id: &str, kind: &str) -> StepDescriptor {
    StepDescriptor::new(id, kind, json!({}))
}

#[test]
fn nested_conditional_body_unwinds_back_to_parent_sequence() {
    let mut q = WorkflowQueue::new(
        "wf_1",
        vec![step("before", "user_message"), step("gate", "conditional"), step("after", "user_message")],
    );
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "before"));
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "gate"));
    q.push_frame(Frame::new(vec![step("inner", "user_message")], FrameKind::Sequential));
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "inner"));
    // The conditional's frame is now exhausted and auto-unwinds; the next
    // step is the parent sequence's next sibling, not a FrameExhausted event
    // (Sequential frames never ask the executor whether to restart).
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "after"));
}

#[test]
fn foreach_frame_restarts_across_items_until_exhausted() {
    let mut q = WorkflowQueue::new("wf_1", vec![]);
    q.push_frame(Frame::new(
        vec![step("visit", "user_message")],
        FrameKind::Foreach { step_id: "fe".to_string(), items: vec![Value::Int(1), Value::Int(2)], index: 0 },
    ));
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "visit"));
    match q.pop_next() {
        QueueEvent::FrameExhausted(FrameKind::Foreach { index, items, .. }) => {
            assert_eq!(index, 0);
            assert_eq!(items.len(), 2);
            q.restart_top_frame(FrameKind::Foreach { step_id: "fe".to_string(), items, index: 1 });
        }
        other => panic!("expected foreach exhaustion, got {other:?}"),
    }
    assert!(matches!(q.pop_next(), QueueEvent::Step(s) if s.id == "visit"));
    assert!(matches!(q.pop_next(), QueueEvent::FrameExhausted(FrameKind::Foreach { index: 1, .. })));
}

#[test]
fn depth_tracks_active_frame_count() {
    let mut q = WorkflowQueue::new("wf_1", vec![step("a", "conditional")]);
    assert_eq!(q.depth(), 1);
    q.pop_next();
    q.push_frame(Frame::new(vec![step("b", "user_message")], FrameKind::Sequential));
    assert_eq!(q.depth(), 2);
}

#[test]
fn composite_step_id_matches_task_dot_step_grammar() {
    assert_eq!(composite_step_id("enforce.item0", "lint"), "enforce.item0.lint");
    assert_eq!(composite_step_id("enforce.item12", "say"), "enforce.item12.say");
}
