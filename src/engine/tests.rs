use super::*;
use crate::host::CountingRenderer;
use crate::logger::{create_log_channel, Severity};
use crate::vm::opcode::{Cmd, Value};

fn engine() -> Engine {
    Engine::new(EngineConfig::default(), Logger::new_silent())
}

fn incr(name: &str) -> OpCode {
    OpCode::assign(name, OpCode::binary(Cmd::Add, Value::var(name), 1))
}

fn ticks_until<F: Fn(&Engine) -> bool>(engine: &Engine, done: F) -> u64 {
    let mut ticks = 0;
    while !done(engine) {
        engine.update().unwrap();
        ticks += 1;
        assert!(ticks < 10_000);
    }
    ticks
}

#[test]
fn one_instruction_per_tick() {
    let engine = engine();
    let id = engine.register_sequence(
        vec![OpCode::assign("a", 1), OpCode::assign("b", 2)],
        TimingMode::Time,
        0,
    );
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(id, "a"), Some(VariableValue::Integer(1)));
    assert_eq!(engine.sequencer_variable(id, "b"), None);
    engine.update().unwrap();
    assert_eq!(engine.sequencer_state(id), Some(SequencerState::Complete));
    engine.update().unwrap();
    assert_eq!(engine.sequencer_state(id), Some(SequencerState::Inactive));
    assert_eq!(engine.cleanup_sequences(), 1);
    assert_eq!(engine.sequencer_count(), 0);
    assert_eq!(engine.frame_tick(), 3);
}

#[test]
fn wait_blocks_for_step_times_ticks() {
    let engine = engine();
    let id = engine.register_sequence(
        vec![OpCode::wait(2), OpCode::assign("after", 1)],
        TimingMode::Time,
        0,
    );
    engine.update().unwrap();
    let waited = ticks_until(&engine, |e| {
        e.sequencer_state(id) != Some(SequencerState::Waiting)
    });
    assert_eq!(waited, 6);
    assert_eq!(engine.sequencer_variable(id, "after"), None);
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(id, "after"), Some(VariableValue::Integer(1)));
}

#[test]
fn clocks_only_advance_their_own_tasks() {
    let engine = engine();
    let time = engine.register_sequence(vec![incr("n")], TimingMode::Time, 0);
    let midi = engine.register_sequence(vec![incr("n")], TimingMode::MidiTime, 0);
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(time, "n"), Some(VariableValue::Integer(1)));
    assert_eq!(engine.sequencer_variable(midi, "n"), None);
    engine.update_midi_sequences(1).unwrap();
    assert_eq!(engine.sequencer_variable(midi, "n"), Some(VariableValue::Integer(1)));
    assert_eq!(engine.midi_tick(), 1);
    assert_eq!(engine.frame_tick(), 1);
}

#[test]
fn midi_wait_counts_midi_ticks() {
    let engine = engine();
    let id = engine.register_sequence(
        vec![OpCode::wait(4), OpCode::assign("after", 1)],
        TimingMode::MidiTime,
        0,
    );
    engine.update_midi_sequences(5).unwrap();
    assert_eq!(engine.sequencer_variable(id, "after"), None);
    engine.update_midi_sequences(1).unwrap();
    assert_eq!(engine.sequencer_variable(id, "after"), Some(VariableValue::Integer(1)));
}

#[test]
fn tasks_spawned_during_a_tick_start_next_tick() {
    let engine = engine();
    engine.register_mes_block(EventType::User, vec![incr("ran")], None, Some(1));
    engine.register_sequence(
        vec![OpCode::call("PostMes", vec![Value::from(1), Value::from(7)])],
        TimingMode::Time,
        0,
    );
    engine.update().unwrap();
    assert_eq!(engine.sequencer_count(), 2);
    let spawned = engine.with_state(|state| state.sequencers()[1].id);
    assert_eq!(engine.sequencer_variable(spawned, "ran"), None);
    assert_eq!(engine.sequencer_variable(spawned, "MesP1"), Some(VariableValue::Integer(7)));
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(spawned, "ran"), Some(VariableValue::Integer(1)));
}

#[test]
fn script_errors_stay_with_their_task() {
    let (tx, rx) = create_log_channel();
    let engine = Engine::new(EngineConfig::default(), Logger::new_embedded(tx));
    let broken = engine.register_sequence(
        vec![
            OpCode::assign("x", OpCode::binary(Cmd::Div, 1, 0)),
            OpCode::assign("after", 1),
        ],
        TimingMode::Time,
        0,
    );
    let healthy = engine.register_sequence(vec![incr("n")], TimingMode::Time, 0);
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(healthy, "n"), Some(VariableValue::Integer(1)));

    let faults = engine.drain_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].sequencer, broken);
    assert_eq!(faults[0].pc, 0);
    assert_eq!(faults[0].error, FillyError::DivisionByZero);
    assert!(rx.try_iter().any(|m| m.level == Severity::Error && m.msg.contains("division by zero")));

    // The failing statement is skipped, the task carries on.
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(broken, "after"), Some(VariableValue::Integer(1)));
}

#[test]
fn out_of_range_index_is_a_fault() {
    let engine = engine();
    let id = engine.register_sequence(
        vec![OpCode::assign_index("a", i64::MAX, 1), OpCode::assign("after", 1)],
        TimingMode::Time,
        0,
    );
    engine.update().unwrap();
    let faults = engine.drain_faults();
    assert_eq!(faults.len(), 1);
    assert!(matches!(faults[0].error, FillyError::Type(_)));
    engine.update().unwrap();
    assert_eq!(engine.sequencer_variable(id, "after"), Some(VariableValue::Integer(1)));
}

#[test]
fn runaway_loop_terminates_the_engine() {
    let config = EngineConfig {
        max_loop_iterations: 500,
        ..Default::default()
    };
    let engine = Engine::new(config, Logger::new_silent());
    engine.register_sequence(vec![OpCode::while_loop(1, vec![])], TimingMode::Time, 0);
    let other = engine.register_sequence(vec![incr("n")], TimingMode::Time, 0);
    assert_eq!(
        engine.update(),
        Err(FillyError::Terminated(TerminationReason::IterationLimit))
    );
    assert!(engine.is_terminated());
    assert_eq!(engine.termination_reason(), Some(TerminationReason::IterationLimit));
    assert!(engine.drain_faults().is_empty());

    let tick = engine.frame_tick();
    assert_eq!(
        engine.update(),
        Err(FillyError::Terminated(TerminationReason::IterationLimit))
    );
    assert_eq!(engine.frame_tick(), tick);
    assert_eq!(engine.sequencer_variable(other, "n"), None);
}

#[test]
fn deep_recursion_only_stops_its_task() {
    let engine = engine();
    engine.register_function(UserFunction::new(
        "dive",
        vec![],
        vec![OpCode::call("dive", vec![])],
    ));
    let diver = engine.register_sequence(vec![OpCode::call("dive", vec![])], TimingMode::Time, 0);
    let other = engine.register_sequence(vec![OpCode::wait(1)], TimingMode::Time, 0);
    engine.update().unwrap();
    assert_eq!(engine.sequencer_state(diver), Some(SequencerState::Inactive));
    assert_eq!(engine.sequencer_state(other), Some(SequencerState::Waiting));
    assert!(!engine.is_terminated());
    assert_eq!(
        engine.drain_faults()[0].error,
        FillyError::Terminated(TerminationReason::CallDepth)
    );
}

#[test]
fn terminate_freezes_the_engine() {
    let engine = engine();
    engine.register_sequence(vec![incr("n")], TimingMode::Time, 0);
    engine.update().unwrap();
    engine.terminate();
    engine.terminate();
    for _ in 0..3 {
        assert_eq!(
            engine.update(),
            Err(FillyError::Terminated(TerminationReason::Stopped))
        );
        assert!(engine.update_midi_sequences(4).is_err());
    }
    assert_eq!(engine.frame_tick(), 1);
    assert_eq!(engine.midi_tick(), 0);
    assert_eq!(engine.status().terminated, Some(TerminationReason::Stopped));
}

#[test]
fn expired_timeout_terminates() {
    let engine = engine();
    engine.set_timeout(Some(Duration::ZERO));
    assert!(engine.update().is_ok());
    engine.start();
    assert_eq!(
        engine.update(),
        Err(FillyError::Terminated(TerminationReason::Timeout))
    );
    assert_eq!(engine.termination_reason(), Some(TerminationReason::Timeout));
}

#[test]
fn del_us_from_a_handler_stops_its_group_only() {
    let engine = engine();
    let (_, first) = engine.register_mes_block(
        EventType::Time,
        vec![OpCode::wait(1), OpCode::call("DelUs", vec![])],
        None,
        None,
    );
    let (_, second) = engine.register_mes_block(EventType::Time, vec![OpCode::wait(100)], None, None);
    let main = engine.register_sequence(vec![OpCode::wait(100)], TimingMode::Time, 0);
    for _ in 0..5 {
        engine.update().unwrap();
    }
    assert_eq!(engine.sequencer_state(first.unwrap()), Some(SequencerState::Inactive));
    assert_eq!(engine.sequencer_state(second.unwrap()), Some(SequencerState::Waiting));
    assert_eq!(engine.sequencer_state(main), Some(SequencerState::Waiting));
}

#[test]
fn mes_block_inherits_parent_group() {
    let engine = engine();
    let (parent_group, parent) = engine.register_mes_block(EventType::Time, vec![OpCode::wait(9)], None, None);
    let (group, _) = engine.register_mes_block(EventType::Key, vec![], parent, None);
    assert_ne!(group, parent_group);
    engine.with_state(|state| {
        let handler = state.handlers().iter().find(|h| h.group == group).unwrap();
        assert_eq!(handler.parent_group, parent_group);
    });
}

#[test]
fn host_events_and_midi_end_spawn_handlers() {
    let engine = engine();
    engine.register_mes_block(EventType::Key, vec![], None, None);
    engine.register_mes_block(EventType::MidiEnd, vec![], None, None);
    assert_eq!(engine.sequencer_count(), 0);
    assert_eq!(engine.post_event(EventType::Key, [13, 0, 0, 0]), 1);
    assert_eq!(engine.post_event(EventType::Click, [0, 0, 0, 0]), 0);
    assert_eq!(engine.finish_midi(), 1);
    assert_eq!(engine.sequencer_count(), 2);
}

#[test]
fn midi_clock_feeds_filly_ticks() {
    let engine = engine();
    let id = engine.register_sequence(vec![OpCode::while_loop(1, vec![incr("n"), OpCode::wait(1)])], TimingMode::MidiTime, 0);
    assert_eq!(engine.poll_midi_clock(Duration::from_secs(1)).unwrap(), 0);
    engine.start_midi(TickGenerator::constant(480, 500_000).unwrap());
    // One beat at 120 BPM is 8 FILLY ticks.
    assert_eq!(engine.poll_midi_clock(Duration::from_millis(500)).unwrap(), 8);
    assert_eq!(engine.poll_midi_clock(Duration::from_millis(500)).unwrap(), 0);
    assert_eq!(engine.midi_tick(), 8);
    assert_eq!(engine.sequencer_variable(id, "n"), Some(VariableValue::Integer(4)));
}

#[test]
fn natural_completion() {
    let engine = engine();
    assert!(engine.all_sequences_complete());
    engine.load_program(Program::new(vec![OpCode::assign("x", 1), OpCode::wait(1)]));
    assert!(!engine.all_sequences_complete());
    let ticks = ticks_until(&engine, Engine::all_sequences_complete);
    assert_eq!(ticks, 5);
    assert!(!engine.is_terminated());
}

#[test]
fn render_drains_published_draw_ops() {
    let engine = engine();
    engine.register_sequence(
        vec![
            OpCode::assign("p", OpCode::call("CreatePic", vec![Value::from(10), Value::from(10)])),
            OpCode::call("TextWrite", vec![Value::from("hi"), Value::var("p"), Value::from(0), Value::from(0)]),
        ],
        TimingMode::Time,
        0,
    );
    engine.update().unwrap();
    engine.update().unwrap();
    assert_eq!(engine.snapshot().draw_ops.len(), 1);
    let mut renderer = CountingRenderer::default();
    engine.render(&mut renderer, &mut ()).unwrap();
    engine.render(&mut renderer, &mut ()).unwrap();
    assert_eq!(renderer.frames, 2);
    assert_eq!(renderer.draw_ops, 1);
    assert_eq!(engine.snapshot().pictures.len(), 1);
}

#[test]
fn unrendered_stage_stays_bounded() {
    use crate::stage::MAX_PENDING_DRAW_OPS;

    let engine = engine();
    let zeros: Vec<Value> = (0..8i64).map(Value::from).collect();
    engine.register_sequence(
        vec![OpCode::while_loop(
            1,
            vec![
                OpCode::call("MovePic", zeros),
                OpCode::call("TextWrite", vec!["x".into(), 0.into(), 0.into(), 0.into()]),
                OpCode::wait(1),
            ],
        )],
        TimingMode::Time,
        0,
    );
    for _ in 0..20_000 {
        engine.update().unwrap();
    }
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.draw_ops.len(), MAX_PENDING_DRAW_OPS);
    assert_eq!(snapshot.texts.len(), 1);

    assert_eq!(engine.discard_draw_ops(), MAX_PENDING_DRAW_OPS);
    assert!(engine.snapshot().draw_ops.is_empty());
}

#[test]
fn audio_requests_reach_the_host() {
    let engine = engine();
    engine.register_sequence(vec![OpCode::call("PlayMIDI", vec![Value::from("a.mid")])], TimingMode::Time, 0);
    engine.update().unwrap();
    let requests = engine.drain_audio_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "a.mid");
    assert!(engine.drain_audio_requests().is_empty());
}
