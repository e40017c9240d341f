//! Read `<id>-rawphot.txt` photometry files.
//!
//! Layout:
//!
//! ```text
//! \main_id = 'HD 109085'
//! \plx_value = 54.7
//! \plx_err = 0.15
//! \spectrum = HD109085-irs.csv
//! | Band  | Phot  | Err   | Lim | Unit | bibcode             | exclude |
//! 2MJ     4.12    0.08    0     Jy     2003yCat.2246....0C  0
//! WISE4   0.23    0.01    0     Jy     2012yCat.2311....0C  0
//! ```
//!
//! - keyword lines start with `\`; quoted values are unquoted
//! - the `|` line names the columns; `Band`, `Phot` and `Err` are required
//! - data rows are whitespace separated, in header order
//! - `Lim = 1` marks an upper limit, `exclude = 1` keeps the point but
//!   ignores it in the fit
//! - fluxes in `Jy`, `mJy` or `uJy`; rows in other units (e.g. magnitudes)
//!   are skipped
//! - `\spectrum` names a CSV (`wavelength,fnujy[,e_fnujy]`, µm and Jy)
//!   relative to the rawphot file

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::domain::{ObsKeywords, ObsSpectrum, Observations, PhotPoint, Photometry};
use crate::error::AppError;
use crate::fit::ObservationSource;

/// File-backed observation source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawphotReader;

impl ObservationSource for RawphotReader {
    fn read(&self, rawphot: &Path, include_spectra: bool) -> Result<Option<Observations>, AppError> {
        read_rawphot(rawphot, include_spectra)
    }
}

/// Parsed file contents before spectra are loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rawphot {
    pub keywords: ObsKeywords,
    pub points: Vec<PhotPoint>,
    /// Spectrum files, as written in the file.
    pub spectra: Vec<String>,
}

pub fn read_rawphot(path: &Path, include_spectra: bool) -> Result<Option<Observations>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::input(format!("Failed to read rawphot '{}': {e}", path.display()))
    })?;
    let parsed = parse_rawphot(&text).map_err(|e| {
        AppError::input(format!("{}: {}", path.display(), e.message()))
    })?;

    if parsed.points.is_empty() {
        return Ok(None);
    }

    let mut spectra = Vec::new();
    if include_spectra {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        for name in &parsed.spectra {
            spectra.push(read_spectrum(&dir.join(name))?);
        }
    }

    Ok(Some(Observations {
        photometry: Photometry {
            points: parsed.points,
        },
        spectra,
        keywords: parsed.keywords,
    }))
}

pub fn parse_rawphot(text: &str) -> Result<Rawphot, AppError> {
    let mut out = Rawphot::default();
    let mut columns: Option<HashMap<String, usize>> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(kw) = line.strip_prefix('\\') {
            let Some((key, value)) = kw.split_once('=') else {
                continue;
            };
            apply_keyword(&mut out, key.trim(), unquote(value.trim()));
            continue;
        }

        if line.starts_with('|') {
            let names: HashMap<String, usize> = line
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .enumerate()
                .map(|(i, s)| (s.to_string(), i))
                .collect();
            for required in ["Band", "Phot", "Err"] {
                if !names.contains_key(required) {
                    return Err(AppError::input(format!(
                        "Line {line_no}: header has no '{required}' column."
                    )));
                }
            }
            columns = Some(names);
            continue;
        }

        let Some(cols) = &columns else {
            return Err(AppError::input(format!(
                "Line {line_no}: data row before the column header."
            )));
        };
        if let Some(point) = parse_row(line, cols, line_no)? {
            out.points.push(point);
        }
    }

    Ok(out)
}

fn apply_keyword(out: &mut Rawphot, key: &str, value: &str) {
    let kw = &mut out.keywords;
    match key {
        "main_id" => kw.main_id = Some(value.to_string()),
        "sp_type" => kw.sp_type = Some(value.to_string()),
        "raj2000" => kw.raj2000 = value.parse().ok(),
        "dej2000" => kw.dej2000 = value.parse().ok(),
        "plx_value" => kw.plx_value = value.parse().ok(),
        "plx_err" => kw.plx_err = value.parse().ok(),
        "spectrum" => out.spectra.push(value.to_string()),
        _ => {}
    }
}

fn unquote(value: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner.trim();
        }
    }
    value
}

fn parse_row(
    line: &str,
    cols: &HashMap<String, usize>,
    line_no: usize,
) -> Result<Option<PhotPoint>, AppError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let get = |name: &str| cols.get(name).and_then(|&i| fields.get(i).copied());
    let number = |name: &str| -> Result<f64, AppError> {
        let s = get(name).ok_or_else(|| {
            AppError::input(format!("Line {line_no}: missing '{name}' value."))
        })?;
        s.parse::<f64>()
            .map_err(|_| AppError::input(format!("Line {line_no}: '{name}' value '{s}' is not a number.")))
    };

    let band = get("Band")
        .ok_or_else(|| AppError::input(format!("Line {line_no}: missing 'Band' value.")))?;
    let phot = number("Phot")?;
    let err = number("Err")?;

    let unit = get("Unit").unwrap_or("Jy");
    let Some(scale) = unit_scale(unit) else {
        tracing::warn!(line = line_no, band, unit, "skipping photometry in unsupported unit");
        return Ok(None);
    };
    if !(phot.is_finite() && err.is_finite()) {
        tracing::warn!(line = line_no, band, "skipping non-finite photometry");
        return Ok(None);
    }

    Ok(Some(PhotPoint {
        filter: band.to_string(),
        fnujy: phot * scale,
        e_fnujy: err * scale,
        upper_limit: get("Lim").is_some_and(flag),
        ignore: get("exclude").is_some_and(flag),
        bibcode: get("bibcode").unwrap_or_default().to_string(),
    }))
}

fn flag(s: &str) -> bool {
    matches!(s, "1" | "True" | "true" | "T")
}

fn unit_scale(unit: &str) -> Option<f64> {
    match unit {
        "Jy" => Some(1.0),
        "mJy" => Some(1e-3),
        "uJy" | "µJy" => Some(1e-6),
        _ => None,
    }
}

/// Read a spectrum CSV: `wavelength`, `fnujy`, optional `e_fnujy`.
pub fn read_spectrum(path: &Path) -> Result<ObsSpectrum, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::input(format!("Failed to open spectrum '{}': {e}", path.display()))
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read spectrum headers: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(iw), Some(ifl)) = (column("wavelength"), column("fnujy")) else {
        return Err(AppError::input(format!(
            "Spectrum '{}' needs 'wavelength' and 'fnujy' columns.",
            path.display()
        )));
    };
    let ierr = column("e_fnujy");

    let mut spectrum = ObsSpectrum {
        bibcode: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..ObsSpectrum::default()
    };
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            AppError::input(format!("Spectrum '{}' row {}: {e}", path.display(), idx + 2))
        })?;
        let value = |i: usize| -> Result<f64, AppError> {
            record
                .get(i)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    AppError::input(format!(
                        "Spectrum '{}' row {}: bad number in column {}.",
                        path.display(),
                        idx + 2,
                        i + 1
                    ))
                })
        };
        spectrum.wavelength.push(value(iw)?);
        spectrum.fnujy.push(value(ifl)?);
        spectrum.e_fnujy.push(match ierr {
            Some(i) => value(i)?,
            None => 0.0,
        });
    }

    if spectrum.wavelength.is_empty() {
        return Err(AppError::input(format!("Spectrum '{}' is empty.", path.display())));
    }
    Ok(spectrum)
}
