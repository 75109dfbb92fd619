//! Engine scenarios driven synchronously through `process_pending`.

use std::collections::{HashMap, VecDeque};

use flume::Receiver;
use proptest::prelude::*;

use crate::codec::{
    AccessUnit, BufferOwner, ComponentTarget, Engine, EngineHandle, InputData, MediaFormat,
    Notification, State, StreamResult,
    constants::{MIME_VIDEO_AVC, MIME_VIDEO_VP9},
};
use crate::common::{
    errors::ErrorCode,
    types::{BufferFlags, BufferId, PortIndex},
};
use crate::configs::EngineConfig;
use crate::hardware::{
    ComponentInfo, FlushTarget, LoopbackConfig, LoopbackUnit, SettingsIndex, UnitCall,
    UnitCommand, UnitEvent, UnitState,
};
use crate::surface::{BoxedSurface, MemorySurface, SurfaceApi};

struct Harness {
    engine: Engine,
    handle: EngineHandle,
    unit: LoopbackUnit,
    notes: Receiver<Notification>,
}

impl Harness {
    fn new(unit: LoopbackUnit) -> Self {
        Self::with_config(unit, EngineConfig::default())
    }

    fn with_config(unit: LoopbackUnit, config: EngineConfig) -> Self {
        let (tx, rx) = flume::unbounded();
        let (engine, handle) = Engine::new(Box::new(unit.clone()), config, tx);
        Self {
            engine,
            handle,
            unit,
            notes: rx,
        }
    }

    fn pump(&mut self) {
        self.engine.process_pending();
    }

    fn inject(&mut self, event: UnitEvent) {
        assert!(self.unit.inject(event));
        self.pump();
    }

    fn complete(&mut self, command: UnitCommand) {
        self.inject(UnitEvent::CommandComplete(command));
    }

    fn drain(&self) -> Vec<Notification> {
        self.notes.try_iter().collect()
    }

    fn owner(&self, port: PortIndex, id: BufferId) -> BufferOwner {
        let p = self.engine.context().port(port);
        p.get(p.find(id).unwrap()).owner()
    }

    fn output_ids(&self) -> Vec<BufferId> {
        self.engine
            .context()
            .port(PortIndex::Output)
            .buffers()
            .iter()
            .map(|b| b.id)
            .collect()
    }

    fn setup(&mut self, target: ComponentTarget, surface: Option<MemorySurface>) {
        let surface = surface.map(|s| Box::new(s) as BoxedSurface);
        self.handle
            .setup(target, &avc_decoder(), surface, true)
            .unwrap();
        self.pump();
    }
}

fn avc_decoder() -> MediaFormat {
    MediaFormat {
        mime: MIME_VIDEO_AVC.to_string(),
        width: Some(320),
        height: Some(240),
        ..MediaFormat::default()
    }
}

fn by_mime() -> ComponentTarget {
    ComponentTarget::ByMime {
        mime: MIME_VIDEO_AVC.to_string(),
        encoder: false,
    }
}

fn fills(notes: &[Notification]) -> Vec<BufferId> {
    notes
        .iter()
        .filter_map(|n| match n {
            Notification::FillThisBuffer { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

fn drains(notes: &[Notification]) -> Vec<BufferId> {
    notes
        .iter()
        .filter_map(|n| match n {
            Notification::DrainThisBuffer { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

fn error_codes(notes: &[Notification]) -> Vec<ErrorCode> {
    notes
        .iter()
        .filter_map(|n| match n {
            Notification::Error { code, .. } => Some(*code),
            _ => None,
        })
        .collect()
}

fn empty_buffer_calls(unit: &LoopbackUnit) -> Vec<(BufferId, usize, BufferFlags)> {
    unit.calls()
        .into_iter()
        .filter_map(|c| match c {
            UnitCall::EmptyBuffer { id, len, flags, .. } => Some((id, len, flags)),
            _ => None,
        })
        .collect()
}

fn commands(unit: &LoopbackUnit) -> Vec<UnitCommand> {
    unit.calls()
        .into_iter()
        .filter_map(|c| match c {
            UnitCall::SendCommand(cmd) => Some(cmd),
            _ => None,
        })
        .collect()
}

fn au(len: usize, timestamp_us: i64) -> InputData {
    InputData::AccessUnit(AccessUnit::new(vec![0x5a; len], timestamp_us))
}

/// A manual-mode session walked into Executing with injected completions.
fn executing_manual(config: LoopbackConfig) -> (Harness, Vec<Notification>) {
    let mut h = Harness::new(LoopbackUnit::manual(config));
    h.setup(by_mime(), None);
    assert_eq!(h.engine.state(), State::LoadedToIdle);

    h.complete(UnitCommand::SetState(UnitState::Idle));
    assert_eq!(h.engine.state(), State::IdleToExecuting);
    h.complete(UnitCommand::SetState(UnitState::Executing));
    assert_eq!(h.engine.state(), State::Executing);

    let notes = h.drain();
    (h, notes)
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[test]
fn decode_one_access_unit_to_end_of_stream() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    assert!(matches!(
        notes[0],
        Notification::SessionAllocated { ref component } if component == "loopback.avc.decoder"
    ));
    assert!(notes.contains(&Notification::SessionConfigured));
    let fill = fills(&notes);
    assert_eq!(fill.len(), 1);

    h.handle.submit_input(fill[0], au(100, 0)).unwrap();
    h.pump();
    let submitted = empty_buffer_calls(&h.unit);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, fill[0]);
    assert_eq!(submitted[0].1, 100);
    assert!(submitted[0].2.contains(BufferFlags::END_OF_FRAME));
    h.drain();

    let out = h.output_ids()[0];
    assert_eq!(h.owner(PortIndex::Output, out), BufferOwner::OwnedByHardware);
    h.inject(UnitEvent::FillBufferDone {
        id: out,
        length: 100,
        data: vec![7u8; 100].into(),
        flags: BufferFlags::END_OF_STREAM,
        timestamp_us: 0,
    });

    let notes = h.drain();
    assert_eq!(drains(&notes), vec![out]);
    assert!(error_codes(&notes).is_empty());
    assert!(notes
        .iter()
        .any(|n| matches!(n, Notification::OutputFormatChanged { .. })));
    let eos: Vec<_> = notes
        .iter()
        .filter(|n| matches!(n, Notification::EndOfStream { .. }))
        .collect();
    assert_eq!(
        eos,
        vec![&Notification::EndOfStream {
            result: StreamResult::Ok
        }]
    );
    assert_eq!(h.owner(PortIndex::Output, out), BufferOwner::OwnedByDownstream);
    assert!(!h.engine.is_stopped());
}

#[test]
fn allocation_falls_back_to_the_next_candidate() {
    let mut config = LoopbackConfig::default();
    config.components.insert(
        1,
        ComponentInfo {
            name: "loopback.avc.decoder.alt".to_string(),
            mime: MIME_VIDEO_AVC.to_string(),
            encoder: false,
        },
    );
    config.unavailable.push("loopback.avc.decoder".to_string());

    let mut h = Harness::new(LoopbackUnit::new(config));
    h.handle.allocate(by_mime()).unwrap();
    h.pump();

    assert_eq!(h.engine.state(), State::Loaded);
    assert_eq!(h.unit.component().as_deref(), Some("loopback.avc.decoder.alt"));
    assert_eq!(
        h.drain(),
        vec![Notification::SessionAllocated {
            component: "loopback.avc.decoder.alt".to_string()
        }]
    );
}

#[test]
fn no_component_for_mime_reports_component_not_found() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.handle
        .allocate(ComponentTarget::ByMime {
            mime: MIME_VIDEO_VP9.to_string(),
            encoder: false,
        })
        .unwrap();
    h.pump();

    assert_eq!(h.engine.state(), State::Uninitialized);
    assert_eq!(error_codes(&h.drain()), vec![ErrorCode::ComponentNotFound]);
}

#[test]
fn auto_unit_runs_setup_through_to_executing() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(by_mime(), None);

    assert_eq!(h.engine.state(), State::Executing);
    assert_eq!(h.unit.state(), UnitState::Executing);
    let notes = h.drain();
    assert_eq!(fills(&notes).len(), 1);
    assert_eq!(
        notes
            .iter()
            .filter(|n| matches!(n, Notification::BuffersAllocated { .. }))
            .count(),
        2
    );
    let out = h.engine.context().port(PortIndex::Output);
    assert_eq!(out.count_owned_by(BufferOwner::OwnedByHardware), out.len());
}

#[test]
fn shutdown_keeping_the_session_stops_in_loaded() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(by_mime(), None);
    let fill = fills(&h.drain());

    h.handle.shutdown(true).unwrap();
    h.pump();
    // Waits for the producer to hand its buffer back.
    assert!(matches!(h.engine.state(), State::ExecutingToIdle { .. }));

    h.handle
        .submit_input(fill[0], InputData::Exhausted(StreamResult::Ok))
        .unwrap();
    h.pump();

    assert_eq!(h.engine.state(), State::Loaded);
    assert!(h.drain().contains(&Notification::ShutdownCompleted));
    assert!(!h.unit.calls().contains(&UnitCall::ReleaseSession));
    for port in PortIndex::ALL {
        assert!(h.unit.buffer_ids(port).is_empty());
        assert!(h.engine.context().port(port).is_empty());
    }
}

#[test]
fn restart_after_keeping_the_session_feeds_input_again() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(by_mime(), None);
    let fill = fills(&h.drain());

    h.handle.shutdown(true).unwrap();
    h.pump();
    h.handle
        .submit_input(fill[0], InputData::Exhausted(StreamResult::Ok))
        .unwrap();
    h.pump();
    assert_eq!(h.engine.state(), State::Loaded);
    assert!(!h.engine.context().port(PortIndex::Input).eos);
    h.drain();

    h.handle.start().unwrap();
    h.pump();

    assert_eq!(h.engine.state(), State::Executing);
    let fill = fills(&h.drain());
    assert_eq!(fill.len(), 1);

    h.handle.submit_input(fill[0], au(100, 0)).unwrap();
    h.pump();
    let notes = h.drain();
    assert_eq!(drains(&notes).len(), 1);
    assert!(error_codes(&notes).is_empty());
}

// ── Buffer flow ──────────────────────────────────────────────────────────────

#[test]
fn oversized_access_unit_is_split_across_buffers() {
    let (mut h, notes) = executing_manual(LoopbackConfig {
        input_buffer_size: 256,
        ..LoopbackConfig::default()
    });
    let fill = fills(&notes);

    h.handle
        .submit_input(fill[0], au(300, 40))
        .unwrap();
    h.pump();

    let submitted = empty_buffer_calls(&h.unit);
    assert_eq!(submitted.len(), 2);
    assert_eq!((submitted[0].0, submitted[0].1), (fill[0], 256));
    assert!(!submitted[0].2.contains(BufferFlags::END_OF_FRAME));
    assert_ne!(submitted[1].0, fill[0]);
    assert_eq!(submitted[1].1, 44);
    assert!(submitted[1].2.contains(BufferFlags::END_OF_FRAME));
    assert!(h.engine.context().pending_input.is_empty());
}

#[test]
fn split_tail_is_submitted_before_later_input() {
    let (mut h, notes) = executing_manual(LoopbackConfig {
        input_buffers: 2,
        input_buffer_size: 256,
        ..LoopbackConfig::default()
    });
    let first = fills(&notes)[0];
    h.handle.submit_input(first, au(10, 0)).unwrap();
    h.pump();
    let second = fills(&h.drain())[0];
    h.inject(UnitEvent::EmptyBufferDone { id: first });
    assert_eq!(fills(&h.drain()), vec![first]);

    // Both buffers are with the producer when the oversized unit arrives.
    h.handle.submit_input(second, au(300, 16)).unwrap();
    h.handle.submit_input(first, au(10, 32)).unwrap();
    h.pump();
    assert_eq!(h.engine.context().pending_input.len(), 1);
    h.inject(UnitEvent::EmptyBufferDone { id: second });

    let submitted: Vec<_> = empty_buffer_calls(&h.unit)
        .into_iter()
        .map(|(id, len, flags)| (id, len, flags.contains(BufferFlags::END_OF_FRAME)))
        .collect();
    assert_eq!(
        submitted,
        vec![
            (first, 10, true),
            (second, 256, false),
            (first, 44, true),
            (second, 10, true),
        ]
    );
    assert!(h.engine.context().pending_input.is_empty());
    assert!(!h.engine.is_stopped());
}

#[test]
fn oversized_access_unit_without_partial_frames_is_rejected() {
    let config = EngineConfig {
        allow_partial_frames: Some(false),
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config(
        LoopbackUnit::new(LoopbackConfig {
            input_buffer_size: 256,
            ..LoopbackConfig::default()
        }),
        config,
    );
    h.setup(by_mime(), None);
    let fill = fills(&h.drain());

    h.handle.submit_input(fill[0], au(300, 0)).unwrap();
    h.pump();

    assert_eq!(error_codes(&h.drain()), vec![ErrorCode::InvalidOperation]);
    assert!(empty_buffer_calls(&h.unit).is_empty());
    assert_eq!(h.owner(PortIndex::Input, fill[0]), BufferOwner::OwnedByUs);
    assert!(!h.engine.is_stopped());
}

#[test]
fn in_flight_cap_holds_back_input() {
    let config = EngineConfig {
        max_in_flight_input: Some(1),
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config(LoopbackUnit::manual(LoopbackConfig::default()), config);
    h.setup(by_mime(), None);
    h.complete(UnitCommand::SetState(UnitState::Idle));
    h.complete(UnitCommand::SetState(UnitState::Executing));
    let fill = fills(&h.drain());

    h.handle.submit_input(fill[0], au(10, 0)).unwrap();
    h.pump();
    assert!(fills(&h.drain()).is_empty());

    h.inject(UnitEvent::EmptyBufferDone { id: fill[0] });
    assert_eq!(fills(&h.drain()), vec![fill[0]]);
}

#[test]
fn exhausted_producer_sends_an_empty_eos_buffer() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    let fill = fills(&notes);

    h.handle
        .submit_input(fill[0], InputData::Exhausted(StreamResult::SourceFailed))
        .unwrap();
    h.pump();

    assert_eq!(
        empty_buffer_calls(&h.unit),
        vec![(fill[0], 0, BufferFlags::END_OF_STREAM)]
    );
    let out = h.output_ids()[0];
    h.inject(UnitEvent::FillBufferDone {
        id: out,
        length: 0,
        data: Default::default(),
        flags: BufferFlags::END_OF_STREAM,
        timestamp_us: 0,
    });
    assert!(h.drain().contains(&Notification::EndOfStream {
        result: StreamResult::SourceFailed
    }));
}

#[test]
fn output_end_of_stream_is_reported_once() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    let fill = fills(&notes);
    h.handle
        .submit_input(fill[0], InputData::Exhausted(StreamResult::Ok))
        .unwrap();
    h.pump();
    h.drain();

    let outs = h.output_ids();
    for id in &outs[..2] {
        h.inject(UnitEvent::FillBufferDone {
            id: *id,
            length: 0,
            data: Default::default(),
            flags: BufferFlags::END_OF_STREAM,
            timestamp_us: 0,
        });
    }

    let notes = h.drain();
    assert_eq!(drains(&notes), outs[..2].to_vec());
    let eos = notes
        .iter()
        .filter(|n| matches!(n, Notification::EndOfStream { .. }))
        .count();
    assert_eq!(eos, 1);
    assert!(!h.engine.is_stopped());
}

#[test]
fn request_keyframe_reaches_encoders_only() {
    let (mut h, _) = executing_manual(LoopbackConfig::default());
    h.unit.take_calls();
    h.handle.request_keyframe().unwrap();
    h.pump();
    assert!(h.unit.take_calls().is_empty());

    let mut enc = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    let format = MediaFormat {
        mime: MIME_VIDEO_AVC.to_string(),
        encoder: true,
        width: Some(320),
        height: Some(240),
        frame_rate: Some(30),
        bitrate: Some(500_000),
        i_frame_interval: Some(1),
        color_format: Some(0x15),
        ..MediaFormat::default()
    };
    enc.handle
        .setup(
            ComponentTarget::ByMime {
                mime: MIME_VIDEO_AVC.to_string(),
                encoder: true,
            },
            &format,
            None,
            true,
        )
        .unwrap();
    enc.pump();
    assert_eq!(enc.engine.state(), State::Executing);
    enc.unit.take_calls();

    enc.handle.request_keyframe().unwrap();
    enc.handle.set_bitrate(250_000).unwrap();
    enc.pump();
    let calls = enc.unit.take_calls();
    assert!(calls.contains(&UnitCall::SetParameter("request-keyframe")));
    assert!(calls.contains(&UnitCall::SetParameter("bitrate")));
}

// ── Port reconfiguration ─────────────────────────────────────────────────────

#[test]
fn output_port_settings_change_reallocates_buffers() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(by_mime(), None);
    h.drain();
    let before = h.output_ids();
    h.unit.take_calls();

    h.unit.change_output_geometry(640, 480, 6);
    h.pump();

    assert_eq!(h.engine.state(), State::Executing);
    let cmds = commands(&h.unit);
    assert_eq!(
        cmds,
        vec![
            UnitCommand::DisablePort(PortIndex::Output),
            UnitCommand::EnablePort(PortIndex::Output),
        ]
    );
    let freed = h
        .unit
        .calls()
        .into_iter()
        .filter(|c| matches!(c, UnitCall::FreeBuffer { port: PortIndex::Output, .. }))
        .count();
    assert_eq!(freed, before.len());

    let after = h.output_ids();
    assert_eq!(after.len(), 6);
    assert_eq!(
        after.len(),
        h.unit.port_definition(PortIndex::Output).buffer_count as usize
    );
    assert!(after.iter().all(|id| !before.contains(id)));
    let out = h.engine.context().port(PortIndex::Output);
    assert_eq!(out.count_owned_by(BufferOwner::OwnedByHardware), 6);
}

#[test]
fn crop_change_only_resends_the_format() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    let fill = fills(&notes);
    h.handle.submit_input(fill[0], au(16, 0)).unwrap();
    h.pump();

    let outs = h.output_ids();
    for (i, id) in outs[..2].iter().enumerate() {
        if i == 1 {
            h.inject(UnitEvent::PortSettingsChanged {
                port: PortIndex::Output,
                index: SettingsIndex::OutputCrop,
            });
        }
        h.inject(UnitEvent::FillBufferDone {
            id: *id,
            length: 16,
            data: vec![1u8; 16].into(),
            flags: BufferFlags::END_OF_FRAME,
            timestamp_us: i as i64,
        });
    }

    let formats = h
        .drain()
        .iter()
        .filter(|n| matches!(n, Notification::OutputFormatChanged { .. }))
        .count();
    assert_eq!(formats, 2);
    assert_eq!(h.engine.state(), State::Executing);
}

// ── Flush and shutdown ordering ──────────────────────────────────────────────

/// Return every buffer held upstream or by the unit in a manual session.
fn reclaim_all(h: &mut Harness, upstream: &[BufferId]) {
    for id in upstream {
        h.handle.submit_input(*id, au(8, 0)).unwrap();
    }
    h.pump();
    for id in h.output_ids() {
        if h.owner(PortIndex::Output, id) == BufferOwner::OwnedByHardware {
            h.inject(UnitEvent::FillBufferDone {
                id,
                length: 0,
                data: Default::default(),
                flags: BufferFlags::NONE,
                timestamp_us: 0,
            });
        }
    }
}

#[test]
fn shutdown_during_flush_waits_for_flush_completion() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    let fill = fills(&notes);
    h.unit.take_calls();

    h.handle.flush().unwrap();
    h.handle.shutdown(false).unwrap();
    h.pump();

    assert!(matches!(h.engine.state(), State::Flushing { .. }));
    assert_eq!(h.engine.deferred().names(), vec!["shutdown"]);
    assert_eq!(commands(&h.unit), vec![UnitCommand::Flush(FlushTarget::All)]);

    reclaim_all(&mut h, &fill);
    assert!(h.drain().is_empty());
    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Input)));
    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Output)));

    assert!(matches!(h.engine.state(), State::ExecutingToIdle { .. }));
    assert!(h.engine.deferred().is_empty());
    assert_eq!(
        commands(&h.unit),
        vec![
            UnitCommand::Flush(FlushTarget::All),
            UnitCommand::SetState(UnitState::Idle),
        ]
    );

    h.complete(UnitCommand::SetState(UnitState::Idle));
    assert_eq!(h.engine.state(), State::IdleToLoaded);
    h.complete(UnitCommand::SetState(UnitState::Loaded));
    assert_eq!(h.engine.state(), State::Uninitialized);

    let notes = h.drain();
    let flushed = notes
        .iter()
        .position(|n| *n == Notification::FlushCompleted)
        .unwrap();
    let shut = notes
        .iter()
        .position(|n| *n == Notification::ShutdownCompleted)
        .unwrap();
    assert!(flushed < shut);
    assert!(h.unit.calls().contains(&UnitCall::ReleaseSession));
}

#[test]
fn second_flush_is_absorbed() {
    let (mut h, notes) = executing_manual(LoopbackConfig::default());
    let fill = fills(&notes);

    h.handle.flush().unwrap();
    h.handle.flush().unwrap();
    h.pump();
    reclaim_all(&mut h, &fill);
    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Input)));
    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Output)));
    h.complete(UnitCommand::Flush(FlushTarget::All));

    let flush_commands = commands(&h.unit)
        .into_iter()
        .filter(|c| matches!(c, UnitCommand::Flush(_)))
        .count();
    assert_eq!(flush_commands, 1);
    let completed = h
        .drain()
        .iter()
        .filter(|n| **n == Notification::FlushCompleted)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(h.engine.state(), State::Executing);
    assert!(!h.engine.context().executing_active);

    h.handle.resume().unwrap();
    h.pump();
    assert_eq!(fills(&h.drain()).len(), 1);
}

#[test]
fn duplicate_port_flush_completion_is_fatal() {
    let (mut h, _) = executing_manual(LoopbackConfig::default());
    h.handle.flush().unwrap();
    h.pump();

    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Input)));
    h.complete(UnitCommand::Flush(FlushTarget::Port(PortIndex::Input)));

    assert!(h.engine.is_stopped());
    assert_eq!(error_codes(&h.drain()), vec![ErrorCode::Protocol]);
}

#[test]
fn deferred_messages_replay_in_arrival_order() {
    let mut h = Harness::new(LoopbackUnit::manual(LoopbackConfig::default()));
    h.setup(by_mime(), None);
    assert_eq!(h.engine.state(), State::LoadedToIdle);

    h.handle.flush().unwrap();
    h.handle.flush().unwrap();
    h.handle.shutdown(false).unwrap();
    h.pump();
    assert_eq!(
        h.engine.deferred().names(),
        vec!["flush", "flush", "shutdown"]
    );

    h.complete(UnitCommand::SetState(UnitState::Idle));
    assert_eq!(h.engine.deferred().len(), 3);
    h.unit.take_calls();
    h.complete(UnitCommand::SetState(UnitState::Executing));

    // First flush starts flushing, the second is absorbed, shutdown waits again.
    assert!(matches!(h.engine.state(), State::Flushing { .. }));
    assert_eq!(h.engine.deferred().names(), vec!["shutdown"]);
    let flushes = commands(&h.unit)
        .into_iter()
        .filter(|c| matches!(c, UnitCommand::Flush(_)))
        .count();
    assert_eq!(flushes, 1);
    assert!(!h.engine.is_stopped());
}

#[test]
fn flush_while_shutting_down_is_a_usage_error() {
    let (mut h, _) = executing_manual(LoopbackConfig::default());
    h.handle.shutdown(false).unwrap();
    h.handle.flush().unwrap();
    h.pump();

    assert!(h.engine.is_stopped());
    assert_eq!(error_codes(&h.drain()), vec![ErrorCode::InvalidOperation]);
}

#[test]
fn allocation_failure_returns_to_loaded() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig {
        fail_allocation_after: Some(5),
        ..LoopbackConfig::default()
    }));
    h.setup(by_mime(), None);

    assert_eq!(h.engine.state(), State::Loaded);
    assert!(!h.engine.is_stopped());
    assert_eq!(
        error_codes(&h.drain()),
        vec![ErrorCode::InsufficientResources]
    );
    for port in PortIndex::ALL {
        assert!(h.engine.context().port(port).is_empty());
        assert!(h.unit.buffer_ids(port).is_empty());
    }
}

// ── Surfaces ─────────────────────────────────────────────────────────────────

#[test]
fn surface_buffers_keep_undequeued_spares_and_reject_strangers() {
    let surface = MemorySurface::new(2);
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(by_mime(), Some(surface.clone()));
    assert_eq!(h.engine.state(), State::Executing);

    let snap = surface.snapshot();
    assert_eq!(snap.buffer_count, 4);
    assert_eq!(snap.dequeued, 2);
    assert_eq!(snap.cancelled_total, 2);
    assert_eq!(snap.usage, 0x100);
    assert_eq!((snap.width, snap.height), (320, 240));

    let out = h.engine.context().port(PortIndex::Output);
    assert_eq!(out.count_owned_by(BufferOwner::OwnedByHardware), 2);
    assert_eq!(out.count_owned_by(BufferOwner::OwnedBySurface), 2);

    let fill = fills(&h.drain());
    h.handle.submit_input(fill[0], au(100, 0)).unwrap();
    h.pump();
    let drained = drains(&h.drain());
    assert_eq!(drained.len(), 1);
    assert!(surface.snapshot().crop.is_some());

    surface.inject_foreign_buffer();
    h.handle.release_output(drained[0], true).unwrap();
    h.pump();

    let snap = surface.snapshot();
    assert_eq!(snap.queued_total, 1);
    assert_eq!(snap.cancelled_total, 3);
    assert_eq!(
        h.owner(PortIndex::Output, drained[0]),
        BufferOwner::OwnedBySurface
    );
    assert!(!h.engine.is_stopped());
}

#[test]
fn protected_output_requires_a_composer_surface() {
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(
        ComponentTarget::Named("loopback.avc.decoder.secure".to_string()),
        Some(MemorySurface::offscreen(2)),
    );

    assert_eq!(h.engine.state(), State::Loaded);
    assert!(!error_codes(&h.drain()).is_empty());
    assert!(h.engine.context().port(PortIndex::Output).is_empty());
}

#[test]
fn secure_teardown_pushes_blank_frames() {
    let surface = MemorySurface::new(2);
    let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
    h.setup(
        ComponentTarget::Named("loopback.avc.decoder.secure".to_string()),
        Some(surface.clone()),
    );
    assert_eq!(h.engine.state(), State::Executing);
    assert!(h.engine.context().secure);
    let fill = fills(&h.drain());

    h.handle.shutdown(false).unwrap();
    h.pump();
    assert!(matches!(
        h.engine.state(),
        State::ExecutingToIdle { unit_idle: true }
    ));

    h.handle
        .submit_input(fill[0], InputData::Exhausted(StreamResult::Ok))
        .unwrap();
    h.pump();

    assert_eq!(h.engine.state(), State::Uninitialized);
    assert!(h.drain().contains(&Notification::ShutdownCompleted));
    let snap = surface.snapshot();
    assert_eq!(snap.blank_frames, 4);
    assert_eq!(snap.connected, Some(SurfaceApi::Media));
}

// ── Ownership invariants under random traffic ────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Feed(usize),
    Release { render: bool },
    Flush,
    Resume,
    Reconfigure(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..12_000).prop_map(Op::Feed),
        4 => any::<bool>().prop_map(|render| Op::Release { render }),
        1 => Just(Op::Flush),
        1 => Just(Op::Resume),
        1 => (2u32..7).prop_map(Op::Reconfigure),
    ]
}

fn allowed(state: State, port: PortIndex, owner: BufferOwner) -> bool {
    use BufferOwner::*;

    match (state, port, owner) {
        (State::Uninitialized | State::Loaded | State::IdleToLoaded, _, _) => false,
        (_, PortIndex::Input, OwnedByUs | OwnedByUpstream | OwnedByHardware) => true,
        (_, PortIndex::Input, _) => false,
        (_, PortIndex::Output, OwnedByUpstream) => false,
        _ => true,
    }
}

/// Ownership edges a buffer may take on `port`.
fn is_protocol_edge(port: PortIndex, from: BufferOwner, to: BufferOwner) -> bool {
    use BufferOwner::*;

    let edges: &[(BufferOwner, BufferOwner)] = match port {
        PortIndex::Input => &[
            (OwnedByUs, OwnedByUpstream),
            (OwnedByUpstream, OwnedByUs),
            (OwnedByUpstream, OwnedByHardware),
            (OwnedByUs, OwnedByHardware),
            (OwnedByHardware, OwnedByUs),
        ],
        PortIndex::Output => &[
            (OwnedByUs, OwnedByHardware),
            (OwnedByHardware, OwnedByDownstream),
            (OwnedByHardware, OwnedByUs),
            (OwnedByDownstream, OwnedByUs),
            (OwnedByDownstream, OwnedBySurface),
            (OwnedBySurface, OwnedByUs),
            (OwnedByUs, OwnedBySurface),
            (OwnedByUs, OwnedByUnexpected),
        ],
    };
    edges.contains(&(from, to))
}

/// Follows each buffer's tag through the port journals between steps.
#[derive(Default)]
struct OwnershipLog {
    seen: [usize; 2],
    tags: HashMap<(PortIndex, BufferId), BufferOwner>,
}

impl OwnershipLog {
    fn tag(&self, port: PortIndex, id: BufferId) -> BufferOwner {
        self.tags
            .get(&(port, id))
            .copied()
            .unwrap_or(BufferOwner::OwnedByUs)
    }

    fn check(&mut self, h: &Harness) -> Result<(), TestCaseError> {
        for port in PortIndex::ALL {
            let p = h.engine.context().port(port);
            let journal = &p.journal()[self.seen[port.slot()]..];
            for &(id, from, to) in journal {
                prop_assert!(
                    is_protocol_edge(port, from, to),
                    "{} buffer {} moved {:?} -> {:?}",
                    port,
                    id,
                    from,
                    to
                );
                prop_assert_eq!(self.tag(port, id), from);
                prop_assert!(from.can_transition(port, to));
                self.tags.insert((port, id), to);
            }
            self.seen[port.slot()] += journal.len();

            for b in p.buffers() {
                prop_assert_eq!(self.tag(port, b.id), b.owner());
            }
        }
        Ok(())
    }
}

fn check_invariants(h: &Harness) -> Result<(), TestCaseError> {
    prop_assert!(!h.engine.is_stopped());
    let state = h.engine.state();

    for port in PortIndex::ALL {
        let p = h.engine.context().port(port);
        let total: usize = BufferOwner::ALL
            .iter()
            .map(|owner| p.count_owned_by(*owner))
            .sum();
        prop_assert_eq!(total, p.len());

        for b in p.buffers() {
            prop_assert!(
                allowed(state, port, b.owner()),
                "{} buffer {} is {:?} in {}",
                port,
                b.id,
                b.owner(),
                state.name()
            );
        }

        let mut ours: Vec<_> = p.buffers().iter().map(|b| b.id).collect();
        let mut theirs = h.unit.buffer_ids(port);
        ours.sort();
        theirs.sort();
        prop_assert_eq!(ours, theirs);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buffers_are_conserved_under_random_traffic(ops in prop::collection::vec(op(), 1..60)) {
        let mut h = Harness::new(LoopbackUnit::new(LoopbackConfig::default()));
        h.setup(by_mime(), None);
        let mut log = OwnershipLog::default();
        log.check(&h)?;

        let mut upstream: VecDeque<BufferId> = VecDeque::new();
        let mut downstream: VecDeque<BufferId> = VecDeque::new();
        let mut ts = 0i64;

        for op in ops {
            for note in h.drain() {
                match note {
                    Notification::FillThisBuffer { id, .. } => upstream.push_back(id),
                    Notification::DrainThisBuffer { id, .. } => downstream.push_back(id),
                    _ => {}
                }
            }

            match op {
                Op::Feed(len) => {
                    if let Some(id) = upstream.pop_front() {
                        ts += 1_000;
                        h.handle.submit_input(id, au(len, ts)).unwrap();
                    }
                }
                Op::Release { render } => {
                    if let Some(id) = downstream.pop_front() {
                        h.handle.release_output(id, render).unwrap();
                    }
                }
                Op::Flush => h.handle.flush().unwrap(),
                Op::Resume => h.handle.resume().unwrap(),
                Op::Reconfigure(count) => h.unit.change_output_geometry(320, 240, count),
            }
            h.pump();
            check_invariants(&h)?;
            log.check(&h)?;
        }
    }
}
