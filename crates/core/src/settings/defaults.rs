//! Factory settings of the camera service.
//!
//! Used until the camera sends its own document during connect. The values
//! mirror what the service reports on a fresh boot.

use std::collections::BTreeMap;

use super::{BoundedScalar, Choice, Enumerated, Extra, Parameter, Resolution, ResolutionChoice, SettingsDocument};

const AWB_MODES: &[&str] = &[
    "off", "auto", "sunlight", "cloudy", "shade", "tungsten", "fluorescent", "incandescent",
    "flash", "horizon",
];

const EFFECTS: &[&str] = &[
    "none", "negative", "solarize", "sketch", "denoise", "emboss", "oilpaint", "hatch", "gpen",
    "pastel", "watercolor", "film", "blur", "saturation", "colorswap", "washedout", "posterise",
    "colorpoint", "colorbalance", "cartoon", "deinterlace1", "deinterlace2",
];

const ISO_VALUES: &[i64] = &[0, 100, 200, 320, 400, 500, 640, 800];

const RESOLUTIONS: &[(u32, u32)] = &[
    (128, 96), (160, 120), (160, 144), (176, 144), (180, 132), (180, 135),
    (192, 144), (234, 60), (256, 192), (320, 200), (320, 240), (320, 288),
    (320, 400), (352, 288), (352, 240), (384, 256), (384, 288), (392, 72),
    (400, 300), (460, 55), (480, 320), (468, 32), (468, 60), (512, 342),
    (512, 384), (544, 372), (640, 350), (640, 480), (640, 576), (704, 576),
    (720, 350), (720, 400), (720, 480), (720, 483), (720, 484), (720, 486),
    (720, 540), (720, 576), (729, 348), (768, 576), (800, 600), (832, 624),
    (856, 480), (896, 600), (960, 720), (1024, 576), (1024, 768), (1080, 720),
    (1152, 768), (1152, 864), (1152, 870), (1152, 900), (1280, 720), (1280, 800),
    (1280, 854), (1280, 960), (1280, 992), (1280, 1024), (1360, 766), (1365, 768),
    (1366, 768), (1365, 1024), (1400, 788), (1400, 1050), (1440, 900), (1520, 856),
    (1536, 1536), (1600, 900), (1600, 1024), (1600, 1200), (1792, 1120), (1792, 1344),
    (1824, 1128), (1824, 1368), (1856, 1392), (1920, 1080), (1920, 1200), (1920, 1440),
    (2000, 1280), (2048, 1152), (2048, 1536), (2048, 2048), (2500, 1340), (2560, 1600),
    (3072, 2252), (3600, 2400),
];

fn text_choices(selected: &str, available: &[&str]) -> Parameter {
    Parameter::Enumerated(Enumerated {
        selected: Choice::from(selected),
        available: available.iter().map(|s| Choice::from(*s)).collect(),
        extra: Extra::new(),
    })
}

fn scalar(min: i64, max: i64, value: i64) -> Parameter {
    Parameter::Scalar(BoundedScalar::new(min as f64, max as f64, value as f64))
}

pub(super) fn picam() -> SettingsDocument {
    let mut servos = BTreeMap::new();
    servos.insert("enable".to_string(), Parameter::Toggle(true));
    servos.insert("pan".to_string(), scalar(0, 180, 90));
    servos.insert("tilt".to_string(), scalar(0, 60, 30));

    let mut doc = SettingsDocument::new();
    doc.insert("awb_mode", text_choices("auto", AWB_MODES));
    doc.insert("brightness", scalar(0, 100, 50));
    doc.insert("contrast", scalar(-100, 100, 0));
    doc.insert("effect", text_choices("none", EFFECTS));
    doc.insert(
        "iso",
        Parameter::Enumerated(Enumerated {
            selected: Choice::Number(0),
            available: ISO_VALUES.iter().map(|v| Choice::Number(*v)).collect(),
            extra: Extra::new(),
        }),
    );
    doc.insert(
        "resolution",
        Parameter::Resolution(ResolutionChoice {
            selected: Resolution::new(720, 480),
            available: RESOLUTIONS
                .iter()
                .map(|&(w, h)| Resolution::new(w, h))
                .collect(),
            extra: Extra::new(),
        }),
    );
    doc.insert("saturation", scalar(-100, 100, 0));
    doc.insert("servos", Parameter::Group(servos));
    doc
}
