//! The two collections the app mirrors.

use mirror::{Collection, Filter, Order, Query};

use crate::model::{Comment, Place};
use crate::schema::{
    COMMENT_SELECT, COMMENTS, CREATED_AT, IS_DELETED, PLACE_ID, PLACE_SELECT, PLACES,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    /// Places that are not deleted.
    #[default]
    Default,
    /// Soft-deleted places.
    Trash,
}

/// Places in one view, newest first.
#[derive(Clone, Debug, Default)]
pub struct PlacesCollection {
    pub view: View,
}

impl Collection for PlacesCollection {
    type Row = Place;

    fn table(&self) -> &str {
        PLACES
    }

    fn query(&self) -> Query {
        Query::new(Filter::all().eq(IS_DELETED, self.view == View::Trash))
            .select(PLACE_SELECT)
            .order(Order::desc(CREATED_AT))
    }

    fn id(row: &Place) -> &str {
        &row.id
    }
}

/// Comments on one place, oldest first.
#[derive(Clone, Debug)]
pub struct CommentsCollection {
    pub place_id: String,
}

impl Collection for CommentsCollection {
    type Row = Comment;

    fn table(&self) -> &str {
        COMMENTS
    }

    fn query(&self) -> Query {
        Query::new(Filter::all().eq(PLACE_ID, self.place_id.as_str()))
            .select(COMMENT_SELECT)
            .order(Order::asc(CREATED_AT))
    }

    fn id(row: &Comment) -> &str {
        &row.id
    }
}
