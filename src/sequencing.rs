use chrono::Utc;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Sequence;
use crate::schema::sequences;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
    #[error("sequence is closed for emission")]
    Closed,
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

/// Reserves `quantity` consecutive numbers from a sequence and returns the
/// first one. The row is locked until the enclosing transaction ends, so
/// concurrent reservations against one sequence serialize and never issue
/// overlapping numbers. Must be called inside a transaction together with
/// the insert of the emissions being numbered; rollback restores the
/// counter.
pub fn reserve(
    conn: &mut PgConnection,
    sequence_id: Uuid,
    quantity: i32,
) -> Result<i32, SequenceError> {
    if quantity < 1 {
        return Err(SequenceError::InvalidQuantity(quantity));
    }

    let locked: Sequence = sequences::table
        .find(sequence_id)
        .for_update()
        .first(conn)?;

    if !locked.can_emit {
        return Err(SequenceError::Closed);
    }

    diesel::update(sequences::table.find(sequence_id))
        .set((
            sequences::sequence.eq(locked.sequence + quantity),
            sequences::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    Ok(locked.sequence + 1)
}

/// The department's currently open numbering stream, if any. Ordered so
/// the resolution is deterministic when several sequences are left open.
pub fn open_sequence(
    conn: &mut PgConnection,
    department_id: Uuid,
) -> QueryResult<Option<Sequence>> {
    sequences::table
        .filter(sequences::department_id.eq(department_id))
        .filter(sequences::can_emit.eq(true))
        .order((sequences::year.desc(), sequences::created_at.desc()))
        .first(conn)
        .optional()
}
