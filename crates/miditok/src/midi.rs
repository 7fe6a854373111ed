//! Standard MIDI File conversion via midly.

use crate::score::{Score, ScoreEvent, ScoreEventKind};
use crate::SerializeError;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::collections::{HashMap, VecDeque};

const MAX_DELTA: u32 = 0x0FFF_FFFF;
const MAX_TEMPO: u32 = 0x00FF_FFFF;

/// Render a score as a format 1 SMF, one MIDI track per score track.
///
/// An empty score still produces a valid file with one empty track.
pub fn score_to_midi(score: &Score) -> Result<Vec<u8>, SerializeError> {
    if score.ticks_per_beat == 0 || score.ticks_per_beat > 0x7FFF {
        return Err(SerializeError::OutOfRange {
            field: "ticks_per_beat",
            value: u32::from(score.ticks_per_beat),
        });
    }

    let header = Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(score.ticks_per_beat)),
    );

    let mut tracks: Vec<Vec<TrackEvent<'static>>> = Vec::with_capacity(score.tracks.len().max(1));
    for events in &score.tracks {
        tracks.push(render_track(events)?);
    }
    if tracks.is_empty() {
        tracks.push(vec![end_of_track()]);
    }

    let smf = Smf { header, tracks };
    let mut buffer = Vec::new();
    smf.write(&mut buffer)
        .map_err(|e| SerializeError::Write(e.to_string()))?;
    Ok(buffer)
}

/// Order of simultaneous events: meta first, then program and controller
/// changes, then note-offs, then note-ons.
fn rank(kind: &TrackEventKind<'_>) -> u8 {
    match kind {
        TrackEventKind::Meta(_) => 0,
        TrackEventKind::Midi {
            message: MidiMessage::NoteOff { .. },
            ..
        } => 2,
        TrackEventKind::Midi {
            message: MidiMessage::NoteOn { .. },
            ..
        } => 3,
        _ => 1,
    }
}

fn render_track(events: &[ScoreEvent]) -> Result<Vec<TrackEvent<'static>>, SerializeError> {
    let mut timed: Vec<(u32, TrackEventKind<'static>)> = Vec::with_capacity(events.len() * 2);

    for event in events {
        match event.kind {
            ScoreEventKind::Note {
                channel,
                pitch,
                velocity,
                duration,
            } => {
                let channel = checked_u4("channel", channel)?;
                let key = checked_u7("pitch", pitch)?;
                // velocity 0 would read back as a note-off
                let vel = checked_u7("velocity", velocity.max(1))?;
                let end = event.tick.saturating_add(duration.max(1));
                timed.push((
                    event.tick,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOn { key, vel },
                    },
                ));
                timed.push((
                    end,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOff {
                            key,
                            vel: u7::new(0),
                        },
                    },
                ));
            }
            ScoreEventKind::PatchChange { channel, program } => timed.push((
                event.tick,
                TrackEventKind::Midi {
                    channel: checked_u4("channel", channel)?,
                    message: MidiMessage::ProgramChange {
                        program: checked_u7("program", program)?,
                    },
                },
            )),
            ScoreEventKind::ControlChange {
                channel,
                controller,
                value,
            } => timed.push((
                event.tick,
                TrackEventKind::Midi {
                    channel: checked_u4("channel", channel)?,
                    message: MidiMessage::Controller {
                        controller: checked_u7("controller", controller)?,
                        value: checked_u7("value", value)?,
                    },
                },
            )),
            ScoreEventKind::Tempo { micros_per_beat } => {
                if micros_per_beat > MAX_TEMPO {
                    return Err(SerializeError::OutOfRange {
                        field: "tempo",
                        value: micros_per_beat,
                    });
                }
                timed.push((
                    event.tick,
                    TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_beat))),
                ));
            }
            ScoreEventKind::TimeSignature {
                numerator,
                denominator_pow,
            } => timed.push((
                event.tick,
                TrackEventKind::Meta(MetaMessage::TimeSignature(
                    numerator,
                    denominator_pow,
                    24,
                    8,
                )),
            )),
            ScoreEventKind::KeySignature {
                sharps_flats,
                minor,
            } => timed.push((
                event.tick,
                TrackEventKind::Meta(MetaMessage::KeySignature(sharps_flats, minor)),
            )),
        }
    }

    timed.sort_by_key(|(tick, kind)| (*tick, rank(kind)));

    let mut track = Vec::with_capacity(timed.len() + 1);
    let mut last = 0u32;
    for (tick, kind) in timed {
        let delta = tick - last;
        if delta > MAX_DELTA {
            return Err(SerializeError::OutOfRange {
                field: "delta",
                value: delta,
            });
        }
        track.push(TrackEvent {
            delta: u28::new(delta),
            kind,
        });
        last = tick;
    }
    track.push(end_of_track());
    Ok(track)
}

fn end_of_track() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

fn checked_u4(field: &'static str, value: u8) -> Result<u4, SerializeError> {
    if value > 15 {
        return Err(SerializeError::OutOfRange {
            field,
            value: u32::from(value),
        });
    }
    Ok(u4::new(value))
}

fn checked_u7(field: &'static str, value: u8) -> Result<u7, SerializeError> {
    if value > 127 {
        return Err(SerializeError::OutOfRange {
            field,
            value: u32::from(value),
        });
    }
    Ok(u7::new(value))
}

/// Parse SMF bytes into a score.
///
/// Notes are paired first-in first-out per channel and key; a note-on with
/// velocity 0 ends a note. Notes still sounding at the end of a track end
/// there. Messages with no score counterpart are dropped.
pub fn midi_to_score(bytes: &[u8]) -> Result<Score, SerializeError> {
    let smf = Smf::parse(bytes).map_err(|e| SerializeError::Parse(e.to_string()))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(..) => 480,
    };

    let mut score = Score::new(ticks_per_beat);
    for track in &smf.tracks {
        let mut events: Vec<ScoreEvent> = Vec::new();
        let mut pending: HashMap<(u8, u8), VecDeque<(usize, u32)>> = HashMap::new();
        let mut tick = 0u32;

        for event in track {
            tick = tick.saturating_add(event.delta.as_int());

            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            pending
                                .entry((channel, key.as_int()))
                                .or_default()
                                .push_back((events.len(), tick));
                            events.push(ScoreEvent {
                                tick,
                                kind: ScoreEventKind::Note {
                                    channel,
                                    pitch: key.as_int(),
                                    velocity: vel.as_int(),
                                    duration: 0,
                                },
                            });
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let open = pending
                                .get_mut(&(channel, key.as_int()))
                                .and_then(VecDeque::pop_front);
                            if let Some((index, onset)) = open {
                                set_duration(&mut events[index], tick - onset);
                            }
                        }
                        MidiMessage::ProgramChange { program } => events.push(ScoreEvent {
                            tick,
                            kind: ScoreEventKind::PatchChange {
                                channel,
                                program: program.as_int(),
                            },
                        }),
                        MidiMessage::Controller { controller, value } => {
                            events.push(ScoreEvent {
                                tick,
                                kind: ScoreEventKind::ControlChange {
                                    channel,
                                    controller: controller.as_int(),
                                    value: value.as_int(),
                                },
                            })
                        }
                        _ => {}
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => events.push(ScoreEvent {
                    tick,
                    kind: ScoreEventKind::Tempo {
                        micros_per_beat: tempo.as_int(),
                    },
                }),
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, denom_pow, _, _)) => {
                    events.push(ScoreEvent {
                        tick,
                        kind: ScoreEventKind::TimeSignature {
                            numerator: num,
                            denominator_pow: denom_pow,
                        },
                    })
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(sf, minor)) => {
                    events.push(ScoreEvent {
                        tick,
                        kind: ScoreEventKind::KeySignature {
                            sharps_flats: sf,
                            minor,
                        },
                    })
                }
                _ => {}
            }
        }

        for (index, onset) in pending.into_values().flatten() {
            set_duration(&mut events[index], tick - onset);
        }

        score.tracks.push(events);
    }

    Ok(score)
}

fn set_duration(event: &mut ScoreEvent, ticks: u32) {
    if let ScoreEventKind::Note { duration, .. } = &mut event.kind {
        *duration = ticks;
    }
}
