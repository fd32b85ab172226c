use super::*;

#[test]
fn update_result_exposes_its_document() {
    let document = MatchDocument::new_waiting(MatchId(1), PlayerId::new("a"), chrono::Utc::now());
    let applied = UpdateResult::Applied(document.clone());
    let conflict = UpdateResult::Conflict(document.clone());
    assert!(applied.is_applied());
    assert!(!conflict.is_applied());
    assert_eq!(conflict.into_document(), document);
}
