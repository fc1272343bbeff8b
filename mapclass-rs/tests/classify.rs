use mapclass_rs::{AlignmentRecord, ClassificationMap, MappingClass, classify_group};
use mapclass_rs::classify::Tier;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

fn mapping(name: &str, start: usize, errors: u32) -> AlignmentRecord {
    let mut record = AlignmentRecord::new(
        name,
        0,
        "chr1",
        start,
        vec![Op::new(CigarKind::Match, 10)],
        b"ACGTACGTAC".to_vec(),
    );
    record.error_count = Some(errors);
    record
}

fn classes(records: &[AlignmentRecord]) -> Vec<MappingClass> {
    records
        .iter()
        .map(|r| MappingClass::from_id(r.classification.unwrap()).unwrap())
        .collect()
}

#[test]
fn single_perfect_mapping_is_unique() {
    let mut map = ClassificationMap::new();
    let mut group = vec![mapping("read1", 100, 0)];
    classify_group(&mut group, &mut map);

    assert_eq!(classes(&group), vec![MappingClass::SinglePerfectMatch]);
    assert_eq!(group[0].map_count, Some(1));
    let entry = map.get("read1").unwrap();
    assert!(entry.is_perfect());
    assert!(entry.is_unique());
}

#[test]
fn mixed_group_splits_best_and_common() {
    let mut map = ClassificationMap::new();
    let mut group = vec![mapping("read1", 100, 2), mapping("read1", 500, 1), mapping("read1", 900, 1)];
    classify_group(&mut group, &mut map);

    assert_eq!(
        classes(&group),
        vec![MappingClass::CommonMatch, MappingClass::BestMatch, MappingClass::BestMatch]
    );
    assert!(group.iter().all(|r| r.map_count == Some(3)));
    let entry = map.get("read1").unwrap();
    assert_eq!(entry.min_mismatches, 1);
    assert!(!entry.is_perfect());
    assert!(entry.is_best(1));
    assert!(!entry.is_best(2));
}

#[test]
fn perfect_with_common_alternatives() {
    let mut map = ClassificationMap::new();
    let mut group = vec![mapping("read1", 100, 0), mapping("read1", 400, 3)];
    classify_group(&mut group, &mut map);
    assert_eq!(classes(&group), vec![MappingClass::PerfectMatch, MappingClass::CommonMatch]);
    assert_eq!(MappingClass::PerfectMatch.tier(), Tier::Perfect);
}

#[test]
fn unique_best_match() {
    let mut map = ClassificationMap::new();
    let mut group = vec![mapping("read1", 100, 2)];
    classify_group(&mut group, &mut map);
    assert_eq!(classes(&group), vec![MappingClass::SingleBestMatch]);
    assert!(MappingClass::SingleBestMatch.is_unique());
}

#[test]
fn mates_are_classified_under_separate_keys() {
    let mut map = ClassificationMap::new();
    let mut mate1 = mapping("frag", 100, 0);
    mate1.flags = Flags::SEGMENTED | Flags::FIRST_SEGMENT;
    let mut mate2a = mapping("frag", 300, 1);
    mate2a.flags = Flags::SEGMENTED | Flags::LAST_SEGMENT;
    let mut mate2b = mapping("frag", 700, 1);
    mate2b.flags = Flags::SEGMENTED | Flags::LAST_SEGMENT;

    let mut group = vec![mate1, mate2a, mate2b];
    classify_group(&mut group, &mut map);

    assert_eq!(map.len(), 2);
    assert_eq!(map.get("frag/1").unwrap().map_count, 1);
    assert_eq!(map.get("frag/2").unwrap().map_count, 2);
    assert_eq!(
        classes(&group),
        vec![MappingClass::SinglePerfectMatch, MappingClass::BestMatch, MappingClass::BestMatch]
    );
}

#[test]
fn name_suffix_identifies_mates_without_flags() {
    let mut map = ClassificationMap::new();
    let mut group = vec![mapping("frag/1", 100, 0), mapping("frag/2", 300, 0)];
    classify_group(&mut group, &mut map);
    assert!(map.get("frag/1").is_some());
    assert!(map.get("frag/2").is_some());
}

#[test]
fn minimum_mismatch_never_increases() {
    let mut map = ClassificationMap::new();
    let orders: [&[u32]; 3] = [&[3, 1, 4], &[1, 5, 0], &[2, 2, 2]];
    let mut seen_min = u32::MAX;
    for errors in orders {
        let mut group: Vec<_> = errors.iter().map(|&e| mapping("read1", 100, e)).collect();
        classify_group(&mut group, &mut map);
        seen_min = seen_min.min(*errors.iter().min().unwrap());
        assert!(map.get("read1").unwrap().min_mismatches <= seen_min);
    }
    assert_eq!(map.get("read1").unwrap().min_mismatches, 0);

    let updated = map.update("read1", 7, 2);
    assert_eq!(updated.min_mismatches, 0);
    assert_eq!(updated.map_count, 2);
}

#[test]
fn class_ids_are_stable() {
    let ids: Vec<u8> = [
        MappingClass::PerfectMatch,
        MappingClass::BestMatch,
        MappingClass::CommonMatch,
        MappingClass::SinglePerfectMatch,
        MappingClass::SingleBestMatch,
    ]
    .iter()
    .map(|c| c.id())
    .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(MappingClass::from_id(6), None);
}
