use std::time::Duration;

use filly_core::clock::{filly_tick_from_midi, TempoEvent, TickGenerator};
use filly_core::engine::Engine;
use filly_core::vm::runner::{RunOutcome, Runner};
use filly_core::vm::{Cmd, OpCode, Program, TimingMode, Value, VariableValue};
use filly_core::{EngineConfig, Logger};

#[test]
fn one_quarter_note_at_120_bpm() {
    let generator = TickGenerator::new(480, vec![TempoEvent::new(0, 500_000)]).unwrap();
    assert_eq!(generator.calculate_tick_from_time(0.5), 480);
    assert_eq!(generator.calculate_filly_tick(0.5), 8);
}

#[test]
fn tempo_change_halfway() {
    let generator = TickGenerator::new(
        480,
        vec![TempoEvent::new(0, 500_000), TempoEvent::new(960, 1_000_000)],
    )
    .unwrap();
    assert_eq!(generator.calculate_tick_from_time(1.0), 960);
    assert_eq!(generator.calculate_tick_from_time(2.0), 1440);
    assert_eq!(generator.calculate_tick_from_time(3.0), 1920);
}

#[test]
fn unsorted_map_is_accepted() {
    let generator = TickGenerator::new(
        96,
        vec![TempoEvent::new(192, 250_000), TempoEvent::new(0, 500_000)],
    )
    .unwrap();
    // 192 ticks in the first second, then 384 ticks per second.
    assert_eq!(generator.calculate_tick_from_time(1.5), 192 + 192);
}

#[test]
fn filly_ticks_floor() {
    for ppq in [24u32, 96, 480, 960] {
        for midi in (0..5_000u64).step_by(37) {
            assert_eq!(filly_tick_from_midi(midi, ppq), midi * 8 / ppq as u64);
        }
    }
    assert_eq!(filly_tick_from_midi(59, 480), 0);
    assert_eq!(filly_tick_from_midi(60, 480), 1);
}

#[test]
fn ticks_are_monotonic() {
    let generator = TickGenerator::new(
        480,
        vec![
            TempoEvent::new(0, 600_000),
            TempoEvent::new(500, 300_000),
            TempoEvent::new(1_700, 900_000),
        ],
    )
    .unwrap();
    let mut last = 0;
    for ms in 0..5_000u64 {
        let tick = generator.calculate_tick_from_duration(Duration::from_millis(ms));
        assert!(tick >= last);
        last = tick;
    }
}

#[test]
fn midi_handler_follows_playback() {
    let engine = Engine::new(EngineConfig::default(), Logger::new_silent());
    let body = vec![OpCode::while_loop(
        1,
        vec![
            OpCode::assign("beats", OpCode::binary(Cmd::Add, Value::var("beats"), 1)),
            OpCode::wait(8),
        ],
    )];
    let id = engine.register_sequence(body, TimingMode::MidiTime, 0);
    let result = Runner::new()
        .max_frames(120)
        .midi(TickGenerator::constant(480, 500_000).unwrap())
        .drive(&engine);
    assert_eq!(result.outcome, RunOutcome::FrameLimit);
    // Two seconds at 120 BPM: 32 FILLY ticks, one counted beat every 8.
    assert_eq!(result.midi_ticks, 32);
    assert_eq!(engine.sequencer_variable(id, "beats"), Some(VariableValue::Integer(4)));
}

#[test]
fn step_blocks_run_once_per_step() {
    use filly_core::vm::lowering::StepBlock;

    let mut main = StepBlock::new(Some(Value::Int(2)))
        .stmt(OpCode::assign("a", 1))
        .pause(1)
        .stmt(OpCode::assign("b", 1))
        .pause(2)
        .as_asm();
    main.push(OpCode::assign("done", OpCode::call("GetTick", vec![])));
    let engine = Engine::new(EngineConfig::default(), Logger::new_silent());
    let id = engine.load_program(Program::new(main));
    let result = Runner::new().drive(&engine);
    assert_eq!(result.outcome, RunOutcome::Completed);
    // SetStep, a, wait 6, b, wait 12, end_step, then `done` on the next tick.
    assert_eq!(engine.sequencer_variable(id, "done"), Some(VariableValue::Integer(23)));
}
