#![no_main]

//! Fuzz target for timecode label parsing and frame arithmetic.
//!
//! Any label that parses and validates must survive a trip through its frame
//! count unchanged, and adding frames must never panic.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tcsync_timecode::{add_frames, parse_timecode, validate, FrameRate, Timecode};

#[derive(Arbitrary, Debug)]
struct ParseInput {
    label: String,
    rate: RateChoice,
    delta: i32,
}

#[derive(Arbitrary, Debug, Clone, Copy)]
enum RateChoice {
    Fps23_976,
    Fps24,
    Fps25,
    Fps29_97,
    Fps30,
    Fps50,
    Fps59_94,
    Fps60,
}

impl RateChoice {
    fn frame_rate(self) -> FrameRate {
        match self {
            Self::Fps23_976 => FrameRate::Fps23_976,
            Self::Fps24 => FrameRate::Fps24,
            Self::Fps25 => FrameRate::Fps25,
            Self::Fps29_97 => FrameRate::Fps29_97,
            Self::Fps30 => FrameRate::Fps30,
            Self::Fps50 => FrameRate::Fps50,
            Self::Fps59_94 => FrameRate::Fps59_94,
            Self::Fps60 => FrameRate::Fps60,
        }
    }
}

fuzz_target!(|input: ParseInput| {
    let rate = input.rate.frame_rate();

    let Ok(tc) = parse_timecode(&input.label, rate) else {
        return;
    };
    if !validate(&tc, rate).is_empty() {
        return;
    }
    if tc.drop_frame && !rate.supports_drop_frame() {
        return;
    }

    let frames = tc.to_frames(rate);
    let back = Timecode::from_frames(frames, rate, tc.drop_frame);
    assert_eq!(back, tc, "label {:?} at {}", input.label, rate);
    assert_eq!(back.to_string(), tc.to_string());

    let _ = add_frames(&input.label, input.delta as i64, rate);
});
