use crate::error::AppError;
use crate::sensor::OccupancySource;
use std::collections::VecDeque;

/// Replays a fixed list of chunks; an `Err` entry fails that read.
pub struct ScriptedSource {
    chunks: VecDeque<Result<String, String>>,
}

impl ScriptedSource {
    pub fn new(chunks: Vec<Result<String, String>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    /// One chunk per occupancy reading, formatted like the sensor firmware.
    pub fn from_readings(readings: &[bool]) -> Self {
        Self::new(
            readings
                .iter()
                .map(|occupied| Ok(format!("{{\"occupied\": {occupied}}}\r\n")))
                .collect(),
        )
    }
}

impl OccupancySource for ScriptedSource {
    fn read_chunk(&mut self) -> Result<Option<String>, AppError> {
        match self.chunks.pop_front() {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(message)) => Err(AppError::Source(message)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_then_closes() -> Result<(), AppError> {
        let mut source = ScriptedSource::from_readings(&[true]);

        assert_eq!(
            source.read_chunk()?,
            Some("{\"occupied\": true}\r\n".to_string())
        );
        assert_eq!(source.read_chunk()?, None);
        Ok(())
    }

    #[test]
    fn scripted_error_surfaces_as_source_error() {
        let mut source = ScriptedSource::new(vec![Err("mock read failed".to_string())]);

        let err = source.read_chunk().unwrap_err();

        assert_eq!(err.to_string(), "source error: mock read failed");
    }
}
