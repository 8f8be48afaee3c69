use mirror::RemoteWrite;

use crate::model::Place;
use crate::schema::VOTERS;

/// The voter list after `user_id` toggles their vote. Duplicates are never introduced.
pub fn toggled(voters: &[String], user_id: &str) -> Vec<String> {
    if voters.iter().any(|voter| voter == user_id) {
        voters.iter().filter(|voter| *voter != user_id).cloned().collect()
    } else {
        let mut voters = voters.to_vec();
        voters.push(user_id.to_string());
        voters
    }
}

/// The remote half of a vote toggle, decided from the mirrored voter set.
pub fn vote_write(place: &Place, user_id: &str) -> RemoteWrite {
    let column = VOTERS.to_string();
    let member = user_id.to_string();
    if place.has_voted(user_id) {
        RemoteWrite::RemoveMember { column, member }
    } else {
        RemoteWrite::AppendMember { column, member }
    }
}
