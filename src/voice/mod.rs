//! Voice output
//!
//! Speech synthesis for companion replies. Speech input lives in `stt`.

mod tts;

pub use tts::{
    MP3_ENCODING, SpeechRequest, SpeechSynthesizer, SynthesizedAudio, TextToSpeech, TtsProvider,
};
