use roadeye::{BYTETracker, Detection, STrack, TrackerConfig};

fn confirmed(tracks: Vec<STrack>) -> Vec<STrack> {
    tracks.into_iter().filter(|t| t.is_confirmed()).collect()
}

#[test]
fn test_basic_tracking() {
    let mut tracker = BYTETracker::new(TrackerConfig::default());

    // Frame 1: tracks born in the first frame are confirmed at once
    let tracks1 = confirmed(tracker.update(vec![Detection::new(100.0, 100.0, 200.0, 200.0, 0.9, "car")]));
    assert_eq!(tracks1.len(), 1);
    let id1 = tracks1[0].track_id;
    assert_eq!(id1, 1);

    // Frame 2: same object moved slightly
    let tracks2 = confirmed(tracker.update(vec![Detection::new(105.0, 105.0, 205.0, 205.0, 0.9, "car")]));
    assert_eq!(tracks2.len(), 1);
    assert_eq!(tracks2[0].track_id, id1);

    // Frame 3: partly occluded, low score; kept by the second association
    let tracks3 = confirmed(tracker.update(vec![Detection::new(110.0, 110.0, 210.0, 210.0, 0.2, "car")]));
    assert_eq!(tracks3.len(), 1);
    assert_eq!(tracks3[0].track_id, id1);

    // Frame 4: gone
    assert!(tracker.update(vec![]).is_empty());

    // Frame 5: back within the buffer, same id
    let tracks5 = confirmed(tracker.update(vec![Detection::new(115.0, 115.0, 215.0, 215.0, 0.9, "car")]));
    assert_eq!(tracks5.len(), 1);
    assert_eq!(tracks5[0].track_id, id1);
    assert_eq!(tracks5[0].label, "car");
}

#[test]
fn test_two_objects_keep_separate_ids() {
    let mut tracker = BYTETracker::new(TrackerConfig::default());
    let mut ids = Vec::new();

    for i in 0..10 {
        let dx = 3.0 * i as f32;
        let tracks = confirmed(tracker.update(vec![
            Detection::new(10.0 + dx, 50.0, 60.0 + dx, 90.0, 0.9, "car"),
            Detection::new(300.0 - dx, 50.0, 350.0 - dx, 90.0, 0.85, "truck"),
        ]));
        assert_eq!(tracks.len(), 2);
        let mut frame_ids: Vec<(u64, String)> = tracks.into_iter().map(|t| (t.track_id, t.label)).collect();
        frame_ids.sort();
        ids.push(frame_ids);
    }

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(ids[0], vec![(1, "car".to_string()), (2, "truck".to_string())]);
}

#[test]
fn test_separate_trackers_number_independently() {
    let det = || vec![Detection::new(0.0, 0.0, 50.0, 50.0, 0.9, "car")];

    let mut a = BYTETracker::new(TrackerConfig::default());
    let mut b = BYTETracker::new(TrackerConfig::default());
    a.update(det());
    a.update(vec![Detection::new(200.0, 200.0, 250.0, 250.0, 0.9, "car")]);

    assert_eq!(b.update(det())[0].track_id, 1);
}

#[test]
fn test_late_track_waits_for_second_hit() {
    let mut tracker = BYTETracker::new(TrackerConfig::default());
    tracker.update(vec![]);

    let first = tracker.update(vec![Detection::new(40.0, 40.0, 90.0, 90.0, 0.9, "bus")]);
    assert_eq!(first.len(), 1);
    assert!(!first[0].is_confirmed());

    let second = tracker.update(vec![Detection::new(42.0, 40.0, 92.0, 90.0, 0.9, "bus")]);
    assert!(second[0].is_confirmed());
    assert_eq!(second[0].track_id, first[0].track_id);
}
