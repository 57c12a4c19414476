// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-scheme payload tests.
//!
//! The binary and structured-text schemes must agree on the logical
//! model: any payload either scheme can carry decodes to the same
//! metrics, and alias-only DATA traffic resolves to the same typed
//! values regardless of which scheme carried it.

use hspb::codec::{decode, encode};
use hspb::model::{DataType, MetaData, Metric, MetricValue, Payload, PropertySet, PropertyValue};
use hspb::session::EdgeNodeSession;
use hspb::EncodingScheme;

fn metric(name: &str, datatype: DataType, value: MetricValue) -> Metric {
    Metric {
        name: Some(name.into()),
        alias: None,
        datatype,
        value: Some(value),
        timestamp: None,
        is_historical: false,
        is_transient: false,
        properties: None,
        metadata: None,
    }
}

/// A payload exercising every carrier both schemes support. No NaN:
/// the structured-text scheme cannot represent it.
fn rich_payload() -> Payload {
    let mut props = PropertySet::new();
    props.insert(
        "engUnit",
        PropertyValue::new(DataType::String, Some(MetricValue::from("degC")))
            .expect("valid property"),
    );
    props.insert(
        "engHigh",
        PropertyValue::new(DataType::Double, Some(MetricValue::Double(100.0)))
            .expect("valid property"),
    );

    Payload {
        timestamp: Some(1_700_000_000_000),
        seq: Some(0),
        metrics: vec![
            metric("bdSeq", DataType::Int64, MetricValue::Int64(1)),
            Metric {
                alias: Some(1),
                properties: Some(props),
                ..metric("Temp", DataType::Double, MetricValue::Double(21.5))
            },
            metric("Count", DataType::Int32, MetricValue::Int32(-42)),
            metric("Big", DataType::UInt64, MetricValue::UInt64(u64::MAX)),
            metric("Name", DataType::String, MetricValue::from("press #1")),
            metric("Blob", DataType::Bytes, MetricValue::Bytes(vec![0, 127, 255])),
            metric(
                "Curve",
                DataType::DoubleArray,
                MetricValue::DoubleArray(vec![0.25, -1.5, 3.0]),
            ),
            Metric {
                metadata: Some(MetaData {
                    content_type: Some("text/plain".into()),
                    size: Some(12),
                    ..MetaData::default()
                }),
                ..metric("Note", DataType::Text, MetricValue::from("calibrated"))
            },
            Metric::null("Spare", DataType::Float),
        ],
        uuid: Some("0d5a6c2e".into()),
        body: Some(vec![9, 8, 7]),
    }
}

#[test]
fn test_rich_payload_roundtrips_in_both_schemes() {
    let payload = rich_payload();
    for scheme in [EncodingScheme::Binary, EncodingScheme::Json] {
        let decoded = decode(&encode(&payload, scheme), scheme)
            .unwrap_or_else(|e| panic!("{scheme} decode failed: {e}"));
        assert_eq!(decoded, payload, "{scheme} must carry the full model");
    }
}

#[test]
fn test_cross_scheme_transcode_preserves_model() {
    // Binary bytes in, structured text out, and back: the logical
    // payload is scheme-independent.
    let payload = rich_payload();
    let from_binary =
        decode(&encode(&payload, EncodingScheme::Binary), EncodingScheme::Binary)
            .expect("binary decodes");
    let via_json = decode(
        &encode(&from_binary, EncodingScheme::Json),
        EncodingScheme::Json,
    )
    .expect("transcoded JSON decodes");
    assert_eq!(via_json, payload);
}

#[test]
fn test_birth_seq_zero_explicit_in_both_schemes() {
    let payload = Payload {
        timestamp: Some(10),
        seq: Some(0),
        metrics: vec![metric("bdSeq", DataType::Int64, MetricValue::Int64(1))],
        uuid: None,
        body: None,
    };

    let binary = encode(&payload, EncodingScheme::Binary);
    assert!(
        binary.windows(2).any(|w| w == [0x18, 0x00]),
        "binary birth must write seq 0 explicitly, not elide it: {binary:02X?}"
    );

    let text = String::from_utf8(encode(&payload, EncodingScheme::Json)).expect("JSON is UTF-8");
    assert!(text.contains(r#""seq":0"#), "got: {text}");

    for scheme in [EncodingScheme::Binary, EncodingScheme::Json] {
        assert_eq!(
            decode(&encode(&payload, scheme), scheme)
                .expect("birth decodes")
                .seq,
            Some(0),
            "{scheme} must preserve seq 0"
        );
    }
}

#[test]
fn test_alias_only_data_converges_across_schemes() {
    // The schemes decode datatype-less values differently (raw wire
    // bits vs arithmetic numbers); resolving against the birth scope
    // must erase the difference.
    let birth = Payload::birth(
        Some(5),
        0,
        vec![
            metric("bdSeq", DataType::Int64, MetricValue::Int64(1)),
            Metric {
                alias: Some(3),
                ..metric("Level", DataType::Int32, MetricValue::Int32(0))
            },
            Metric {
                alias: Some(4),
                ..metric("Rate", DataType::Float, MetricValue::Float(1.0))
            },
        ],
    )
    .expect("valid birth");

    let data = Payload {
        timestamp: Some(6),
        seq: Some(1),
        metrics: vec![
            Metric {
                name: None,
                alias: Some(3),
                datatype: DataType::Unknown,
                value: Some(MetricValue::Int32(-5)),
                timestamp: None,
                is_historical: false,
                is_transient: false,
                properties: None,
                metadata: None,
            },
            Metric {
                name: None,
                alias: Some(4),
                datatype: DataType::Unknown,
                value: Some(MetricValue::Float(2.5)),
                timestamp: None,
                is_historical: false,
                is_transient: false,
                properties: None,
                metadata: None,
            },
        ],
        uuid: None,
        body: None,
    };

    for scheme in [EncodingScheme::Binary, EncodingScheme::Json] {
        let mut session = EdgeNodeSession::new("plant", "press01");
        session
            .apply_node_birth(&decode(&encode(&birth, scheme), scheme).expect("birth decodes"), false)
            .expect("birth applies");

        let wire_data = decode(&encode(&data, scheme), scheme).expect("data decodes");
        let resolved = session.apply_node_data(&wire_data).expect("data resolves");

        assert_eq!(
            resolved[0].value,
            Some(MetricValue::Int32(-5)),
            "{scheme}: negative Int32 must survive the provisional decode"
        );
        assert_eq!(resolved[0].name.as_deref(), Some("Level"));
        assert_eq!(
            resolved[1].value,
            Some(MetricValue::Float(2.5)),
            "{scheme}: Float must survive the provisional decode"
        );
        assert_eq!(
            session.metrics().get("Level").and_then(|m| m.value.clone()),
            Some(MetricValue::Int32(-5)),
            "{scheme}: resolved value folds into the mirror"
        );
    }
}

#[test]
fn test_garbage_rejected_by_both_schemes() {
    for scheme in [EncodingScheme::Binary, EncodingScheme::Json] {
        assert!(
            decode(b"\xFF\xFE\xFD not a payload", scheme).is_err(),
            "{scheme} must reject garbage"
        );
    }
}
