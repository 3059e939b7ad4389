//! Session dumps: recorded audio, raw waveform and averaged spectrum

use crate::spectrum::RunningSpectrumAverage;
use anyhow::Result;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a mono 16-bit PCM WAV file
pub fn write_wav<P: AsRef<Path>>(buffer: &[i16], output_path: P, sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(output_path, spec)?;
    for &sample in buffer {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// One sample value per line
pub fn write_waveform<P: AsRef<Path>>(buffer: &[i16], output_path: P) -> Result<()> {
    let mut out = BufWriter::new(File::create(output_path)?);
    for sample in buffer {
        writeln!(out, "{}", sample)?;
    }
    out.flush()?;
    Ok(())
}

/// One `frequency magnitude` pair per line, for every band
pub fn write_spectrum<P: AsRef<Path>>(analyzer: &RunningSpectrumAverage, output_path: P) -> Result<()> {
    let mut out = BufWriter::new(File::create(output_path)?);
    for (frequency, magnitude) in analyzer.frequencies().iter().zip(analyzer.spectrum()) {
        writeln!(out, "{} {}", frequency, magnitude)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("audiotest-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_wav_roundtrip() {
        let path = temp_path("dump.wav");
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        write_wav(&samples, &path, 44100).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_waveform_lines() {
        let path = temp_path("waveform.txt");
        write_waveform(&[3, -7, 0], &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "3\n-7\n0\n");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_spectrum_lines() {
        let path = temp_path("spectrum.txt");
        let mut analyzer = RunningSpectrumAverage::new(4, 800.0);
        analyzer.sample(&[-10.0, -20.0, -30.0, -40.0]);
        write_spectrum(&analyzer, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["0 -10", "100 -20", "200 -30", "300 -40"]);

        std::fs::remove_file(&path).ok();
    }
}
