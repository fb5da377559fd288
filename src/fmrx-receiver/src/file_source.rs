// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Replay of raw interleaved IQ captures.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use fmrx_core::{Gain, RxError, RxResult};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::source::{IqSource, Pacer};

/// Sample encoding of a raw capture file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqFormat {
    /// Complex unsigned 8-bit, as written by `rtl_sdr`.
    #[default]
    Cu8,
    /// Complex signed 8-bit.
    Cs8,
    /// Complex signed 16-bit little endian.
    Cs16,
    /// Complex 32-bit float little endian.
    Cf32,
}

impl IqFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            IqFormat::Cu8 | IqFormat::Cs8 => 2,
            IqFormat::Cs16 => 4,
            IqFormat::Cf32 => 8,
        }
    }

    fn decode(self, c: &[u8]) -> Complex<f32> {
        match self {
            IqFormat::Cu8 => Complex::new((c[0] as f32 - 127.5) / 128.0, (c[1] as f32 - 127.5) / 128.0),
            IqFormat::Cs8 => Complex::new((c[0] as i8) as f32 / 128.0, (c[1] as i8) as f32 / 128.0),
            IqFormat::Cs16 => Complex::new(
                i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0,
                i16::from_le_bytes([c[2], c[3]]) as f32 / 32768.0,
            ),
            IqFormat::Cf32 => Complex::new(
                f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            ),
        }
    }
}

impl std::str::FromStr for IqFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cu8" => Ok(IqFormat::Cu8),
            "cs8" => Ok(IqFormat::Cs8),
            "cs16" => Ok(IqFormat::Cs16),
            "cf32" => Ok(IqFormat::Cf32),
            other => Err(format!("unknown IQ format '{}'", other)),
        }
    }
}

/// IQ source backed by a capture file.
///
/// The file has no header, so its rate and centre frequency come from the
/// caller. Retuning is recorded but cannot change the recorded band.
pub struct FileIqSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    format: IqFormat,
    sample_rate: u32,
    looping: bool,
    pacer: Option<Pacer>,
    raw: Vec<u8>,
}

impl FileIqSource {
    pub fn open(path: &Path, format: IqFormat, sample_rate: u32) -> RxResult<Self> {
        let file = File::open(path).map_err(|e| {
            RxError::Configuration(format!("cannot open IQ file {}: {}", path.display(), e))
        })?;
        tracing::info!(
            "Opened IQ file {} ({:?} at {} Hz)",
            path.display(),
            format,
            sample_rate
        );
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(BufReader::new(file)),
            format,
            sample_rate,
            looping: false,
            pacer: None,
            raw: Vec::new(),
        })
    }

    /// Restart from the beginning at end of file instead of failing.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Release samples at the capture rate.
    pub fn paced(mut self, paced: bool) -> Self {
        self.pacer = paced.then(|| Pacer::new(self.sample_rate));
        self
    }

    /// Fill `raw` as far as the file allows. When looping, rewinds as often
    /// as needed, so captures shorter than one block still fill it.
    fn fill_raw(&mut self, want: usize) -> RxResult<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| RxError::SourceRead("IQ file is closed".into()))?;
        self.raw.resize(want, 0);
        let mut filled = 0;
        // Bytes read since the last rewind; `None` until the first one.
        let mut since_rewind: Option<usize> = None;
        while filled < want {
            let n = reader
                .read(&mut self.raw[filled..])
                .map_err(|e| RxError::SourceRead(format!("{}: {}", self.path.display(), e)))?;
            if n > 0 {
                filled += n;
                if let Some(count) = since_rewind.as_mut() {
                    *count += n;
                }
                continue;
            }
            if !self.looping {
                break;
            }
            if since_rewind == Some(0) {
                return Err(RxError::SourceRead(format!(
                    "IQ file {} is empty",
                    self.path.display()
                )));
            }
            reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| RxError::SourceRead(format!("{}: {}", self.path.display(), e)))?;
            since_rewind = Some(0);
        }
        Ok(filled)
    }
}

impl IqSource for FileIqSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> RxResult<usize> {
        let width = self.format.bytes_per_sample();
        let filled = self.fill_raw(buf.len() * width)?;
        let samples = filled / width;
        if samples == 0 {
            return Err(RxError::SourceRead(format!(
                "end of IQ file {}",
                self.path.display()
            )));
        }
        for (dst, chunk) in buf.iter_mut().zip(self.raw[..samples * width].chunks_exact(width)) {
            *dst = self.format.decode(chunk);
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.pace(samples);
        }
        Ok(samples)
    }

    fn set_frequency(&mut self, hz: u64) -> RxResult<()> {
        tracing::debug!("IQ file source ignores retune to {} Hz", hz);
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: u32) -> RxResult<()> {
        if hz != self.sample_rate {
            return Err(RxError::Configuration(format!(
                "IQ file {} was recorded at {} Hz and cannot be read at {} Hz",
                self.path.display(),
                self.sample_rate,
                hz
            )));
        }
        Ok(())
    }

    fn set_gain(&mut self, _gain: Gain) -> RxResult<()> {
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn describe(&self) -> String {
        format!("file {} ({:?})", self.path.display(), self.format)
    }
}
