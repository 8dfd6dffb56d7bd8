use super::*;

fn two_segment_map() -> TickGenerator {
    TickGenerator::new(
        480,
        vec![TempoEvent::new(0, 500_000), TempoEvent::new(960, 1_000_000)],
    )
    .unwrap()
}

#[test]
fn one_quarter_note_at_120_bpm() {
    let generator = TickGenerator::constant(480, 500_000).unwrap();
    assert_eq!(generator.calculate_tick_from_time(0.5), 480);
}

#[test]
fn tempo_change_splits_elapsed_time() {
    // 960 ticks at 120 BPM fill the first second, then 480 ticks at 60 BPM.
    let generator = two_segment_map();
    assert_eq!(generator.calculate_tick_from_time(2.0), 1440);
    assert_eq!(generator.calculate_tick_from_time(1.0), 960);
    assert_eq!(generator.calculate_tick_from_time(0.999_999), 959);
}

#[test]
fn unsorted_map_is_sorted() {
    let generator = TickGenerator::new(
        480,
        vec![TempoEvent::new(960, 1_000_000), TempoEvent::new(0, 500_000)],
    )
    .unwrap();
    assert_eq!(generator.calculate_tick_from_time(2.0), 1440);
}

#[test]
fn late_first_event_gets_default_prefix() {
    let generator = TickGenerator::new(480, vec![TempoEvent::new(480, 250_000)]).unwrap();
    assert_eq!(generator.tempo_map()[0], TempoEvent::new(0, DEFAULT_MICROS_PER_BEAT));
    // 0.5s at 120 BPM reaches tick 480, the next 0.25s at 240 BPM adds 480 more.
    assert_eq!(generator.calculate_tick_from_time(0.75), 960);
}

#[test]
fn negative_and_nan_elapsed_are_zero() {
    let generator = two_segment_map();
    assert_eq!(generator.calculate_tick_from_time(-3.0), 0);
    assert_eq!(generator.calculate_tick_from_time(f64::NAN), 0);
}

#[test]
fn ticks_are_monotonic() {
    let generator = two_segment_map();
    let mut previous = 0;
    for ms in 0..3000u64 {
        let tick = generator.calculate_tick_from_duration(Duration::from_millis(ms));
        assert!(tick >= previous, "tick went backwards at {} ms", ms);
        previous = tick;
    }
}

#[test]
fn filly_tick_uses_floor_division() {
    assert_eq!(filly_tick_from_midi(480, 480), 8);
    assert_eq!(filly_tick_from_midi(59, 480), 0);
    assert_eq!(filly_tick_from_midi(60, 480), 1);
    assert_eq!(filly_tick_from_midi(119, 480), 1);
    assert_eq!(filly_tick_from_midi(1440, 480), 24);
    assert_eq!(filly_tick_from_midi(100, 96), 8);
}

#[test]
fn filly_tick_matches_formula_for_many_resolutions() {
    for ppq in [24u32, 96, 120, 192, 384, 480, 960] {
        for midi_tick in (0..5000u64).step_by(7) {
            assert_eq!(
                filly_tick_from_midi(midi_tick, ppq),
                midi_tick * 8 / ppq as u64
            );
        }
    }
}

#[test]
fn poll_delivers_non_negative_deltas() {
    let mut generator = TickGenerator::constant(480, 500_000).unwrap();
    // One FILLY tick is a 32nd note: 62.5 ms at 120 BPM.
    assert_eq!(generator.poll(Duration::from_millis(0)), 0);
    assert_eq!(generator.poll(Duration::from_millis(125)), 2);
    assert_eq!(generator.last_delivered_tick(), 2);
    assert_eq!(generator.poll(Duration::from_millis(130)), 0);
    assert_eq!(generator.poll(Duration::from_millis(60)), 0);
    assert_eq!(generator.last_delivered_tick(), 2);
    assert_eq!(generator.poll(Duration::from_millis(500)), 6);
    generator.reset();
    assert_eq!(generator.last_delivered_tick(), 0);
}

#[test]
fn invalid_generators_are_rejected() {
    assert!(TickGenerator::constant(0, 500_000).is_err());
    assert!(TickGenerator::constant(480, 0).is_err());
}

#[test]
fn frame_helper_counts_whole_frames() {
    assert_eq!(frames_in(Duration::from_millis(1000), 60), 60);
    assert_eq!(frames_in(Duration::from_millis(49), 60), 2);
}
