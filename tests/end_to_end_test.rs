//! End-to-end tests: devices -> assembler -> writer -> workbook.

use sheet_logger::acquisition::{BlockSpec, SampleAssembler, SampleLayout};
use sheet_logger::config::{DeviceDefinition, LayoutConfig, LoggerConfig};
use sheet_logger::error::LoggerError;
use sheet_logger::instrument::{DeviceSlot, MockRegisterDevice, RegisterDevice};
use sheet_logger::retry::RetryPolicy;
use sheet_logger::sink::{CellValue, Column, MemoryWorkbook, TabularSink};
use sheet_logger::writer::{RowWriter, WriterConfig};
use std::sync::Arc;
use std::time::Duration;

fn with_headers(sheets: &[&str]) -> Arc<MemoryWorkbook> {
    let book = Arc::new(MemoryWorkbook::with_sheets(sheets.iter().copied()));
    for row in 1..=5 {
        book.set(sheets[0], &format!("A{row}"), format!("header {row}"))
            .unwrap();
    }
    book
}

fn retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

#[tokio::test]
async fn first_sample_lands_on_row_six() {
    let book = with_headers(&["inputs"]);
    let reg = Arc::new(MockRegisterDevice::new("reg"));
    reg.set_registers(512, &[1, 2, 3, 4, 5, 6, 7, 8]);
    reg.set_registers(520, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let layout = SampleLayout::new(vec![
        BlockSpec::registers("reg", 512, 8),
        BlockSpec::registers("reg", 520, 8),
        BlockSpec::registers("spare", 512, 8),
    ]);
    let assembler = SampleAssembler::new(
        layout,
        vec![DeviceSlot::present("reg", reg), DeviceSlot::absent("spare")],
        retry(),
    )
    .unwrap();
    let mut writer = RowWriter::new(book.clone(), assembler, WriterConfig::samples_only());

    assert!(writer.append_sample().await.unwrap());

    let row = &book.sheet_rows("inputs").unwrap()[5];
    assert!(matches!(&row[0], CellValue::Text(stamp) if stamp.len() == 26));
    let values: Vec<CellValue> = row[1..17].to_vec();
    let expected: Vec<CellValue> = (1..=8)
        .chain(1..=8)
        .map(|v: i64| CellValue::Int(v))
        .collect();
    assert_eq!(values, expected);
    let placeholders = book
        .read_range("inputs", "R6:Y6".parse().unwrap())
        .await
        .unwrap();
    assert!(placeholders[0].iter().all(|c| *c == CellValue::Empty));
    assert_eq!(book.get("inputs", "Z6"), Some(CellValue::Empty));

    assert!(writer.append_sample().await.unwrap());
    assert_eq!(writer.cursor().position(), 7);
    assert!(!book.get("inputs", "A7").unwrap().is_blank());
}

#[tokio::test]
async fn failing_device_leaves_no_partial_row() {
    let book = with_headers(&["inputs"]);
    let first = Arc::new(MockRegisterDevice::new("ins2"));
    first.set_registers(512, &[42; 8]);
    let second = Arc::new(MockRegisterDevice::new("ins3"));
    second.fail_next(3);

    let assembler = SampleAssembler::new(
        SampleLayout::new(vec![
            BlockSpec::registers("ins2", 512, 8),
            BlockSpec::registers("ins3", 512, 8),
        ]),
        vec![
            DeviceSlot::present("ins2", first.clone()),
            DeviceSlot::present("ins3", second.clone()),
        ],
        retry(),
    )
    .unwrap();
    let mut writer = RowWriter::new(book.clone(), assembler, WriterConfig::samples_only());

    assert!(!writer.append_sample().await.unwrap());
    let row = book
        .read_range("inputs", "A6:Q6".parse().unwrap())
        .await
        .unwrap();
    assert!(row[0].iter().all(CellValue::is_blank));
    assert_eq!(second.reads(), 3);
}

#[tokio::test]
async fn ignis_preset_full_row() {
    let book = with_headers(&["Inputs", "Results", "Compiled Data"]);
    book.set("Results", "BA5", "Sensitivity").unwrap();
    book.set("Results", "AW3", "mode-2").unwrap();
    book.set("Compiled Data", "CX4", 75i64).unwrap();

    let mut config = LoggerConfig {
        devices: (1..=6)
            .map(|n| DeviceDefinition {
                name: format!("ins{n}"),
                slave: n,
                enabled: true,
            })
            .collect(),
        layout: LayoutConfig::default(),
        ..LoggerConfig::default()
    };
    config.poll.retry.backoff = Duration::from_millis(1);

    let mut poller = sheet_logger::app::build_poller(&config, book.clone(), |def| {
        let device = MockRegisterDevice::new(def.name.clone());
        device.set_registers(512, &[u16::from(def.slave); 16]);
        device.set_registers(320, &[0x0081]);
        Ok(Arc::new(device) as Arc<dyn RegisterDevice>)
    })
    .unwrap();
    assert!(poller.tick().await.unwrap());

    // 1 timestamp + 4 x 16 registers + 2 x 8 bits + 16 placeholders
    let width = 97;
    assert_eq!(Column(width - 1).name(), "CS");
    assert_eq!(book.get("Inputs", "B6"), Some(CellValue::Int(2)));
    // ins1 status bits: 0x81 lsb first
    assert_eq!(book.get("Inputs", "AH6"), Some(CellValue::Int(1)));
    assert_eq!(book.get("Inputs", "AI6"), Some(CellValue::Int(0)));
    assert_eq!(book.get("Inputs", "AO6"), Some(CellValue::Int(1)));
    // ins7 is absent
    assert_eq!(book.get("Inputs", "CS6"), Some(CellValue::Empty));
    // sensitivity: header row itself for the first data row
    assert_eq!(book.get("Inputs", "CT6"), Some(CellValue::from("Sensitivity")));
    assert_eq!(book.get("Inputs", "CU6"), Some(CellValue::from("mode-2")));
    assert_eq!(book.get("Inputs", "CV6"), Some(CellValue::Int(75)));
}

#[tokio::test]
async fn icarus_preset_pins_status_bits() {
    let book = with_headers(&["inputs"]);
    let config = LoggerConfig {
        devices: vec![DeviceDefinition {
            name: "ins1".into(),
            slave: 1,
            enabled: true,
        }],
        layout: LayoutConfig {
            preset: Some(sheet_logger::config::LayoutPreset::Icarus),
            blocks: Vec::new(),
        },
        writer: WriterConfig::samples_only(),
        ..LoggerConfig::default()
    };

    let mut poller = sheet_logger::app::build_poller(&config, book.clone(), |def| {
        let device = MockRegisterDevice::new(def.name.clone());
        device.set_registers(320, &[0x0003]);
        Ok(Arc::new(device) as Arc<dyn RegisterDevice>)
    })
    .unwrap();
    assert!(poller.tick().await.unwrap());

    // ins2..ins4 absent: B..Y blank, status bits at AI..AP
    assert_eq!(book.get("inputs", "B6"), Some(CellValue::Empty));
    assert_eq!(book.get("inputs", "AI6"), Some(CellValue::Int(1)));
    assert_eq!(book.get("inputs", "AJ6"), Some(CellValue::Int(1)));
    assert_eq!(book.get("inputs", "AK6"), Some(CellValue::Int(0)));
    assert_eq!(book.get("inputs", "AP6"), Some(CellValue::Int(0)));
    assert_eq!(book.get("inputs", "AQ6"), Some(CellValue::Empty));
}

#[tokio::test]
async fn missing_lookup_sheet_is_reported() {
    let book = with_headers(&["inputs", "results"]);
    let device = Arc::new(MockRegisterDevice::new("ins2"));
    let assembler = SampleAssembler::new(
        SampleLayout::new(vec![BlockSpec::registers("ins2", 512, 1)]),
        vec![DeviceSlot::present("ins2", device)],
        retry(),
    )
    .unwrap();
    let mut writer = RowWriter::new(book, assembler, WriterConfig::default());
    let err = writer.append_sample().await.unwrap_err();
    assert!(matches!(err, LoggerError::SheetNotFound(name) if name == "compiled data"));
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn csv_workbook_round_trip() {
    use sheet_logger::sink::CsvWorkbook;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("inputs.csv"),
        "h1\nh2\nh3\nh4\nh5\n",
    )
    .unwrap();

    let device = Arc::new(MockRegisterDevice::new("ins2"));
    device.set_registers(512, &[10, 20]);
    let make_writer = |book: Arc<CsvWorkbook>| {
        let assembler = SampleAssembler::new(
            SampleLayout::new(vec![BlockSpec::registers("ins2", 512, 2)]),
            vec![DeviceSlot::present("ins2", device.clone())],
            retry(),
        )
        .unwrap();
        RowWriter::new(book, assembler, WriterConfig::samples_only())
    };

    let mut writer = make_writer(Arc::new(CsvWorkbook::open(dir.path()).unwrap()));
    assert!(writer.append_sample().await.unwrap());

    // A fresh process picks up after the persisted rows.
    let mut writer = make_writer(Arc::new(CsvWorkbook::open(dir.path()).unwrap()));
    assert!(writer.append_sample().await.unwrap());
    assert_eq!(writer.cursor().position(), 7);

    let text = std::fs::read_to_string(dir.path().join("inputs.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7);
    assert!(lines[5].ends_with(",10,20"));
    assert!(lines[6].ends_with(",10,20"));
}
