use crate::model::*;
use sled::transaction::{abort, TransactionError};

const USERS: &'static [u8] = b"users";
const MOVIES: &'static [u8] = b"movies";

// Big-endian keys so tree iteration order matches id order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> u64 {
    use std::convert::TryInto;
    u64::from_be_bytes(id.as_ref().try_into().unwrap())
}

/// Opens both trees so a fresh database file carries the full schema.
pub fn init_schema(db: &sled::Db) -> sled::Result<()> {
    db.open_tree(USERS)?;
    db.open_tree(MOVIES)?;
    Ok(())
}

/// Drops both trees, discarding all rows.
pub fn drop_schema(db: &sled::Db) -> sled::Result<()> {
    db.drop_tree(USERS)?;
    db.drop_tree(MOVIES)?;
    Ok(())
}

pub trait UserStore {
    type Error;
    fn create_user(&self, user: &User) -> Result<u64, Self::Error>;
    fn get_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
    /// The single-tenant acting identity: the row with the lowest id.
    fn first_user(&self) -> Result<Option<(u64, User)>, Self::Error>;
    fn update_user(&self, id: u64, user: &User) -> Result<Option<()>, Self::Error>;
}

pub trait MovieStore {
    type Error;
    fn create_movie(&self, movie: &Movie) -> Result<u64, Self::Error>;
    fn get_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
    fn list_movies(&self) -> Result<Vec<(u64, Movie)>, Self::Error>;
    fn update_movie(&self, id: u64, movie: &Movie) -> Result<Option<()>, Self::Error>;
    fn delete_movie(&self, id: u64) -> Result<Option<Movie>, Self::Error>;
}

impl UserStore for sled::Db {
    type Error = sled::Error;

    fn create_user(&self, user: &User) -> sled::Result<u64> {
        let users = self.open_tree(USERS)?;
        let id = self.generate_id()?;
        users.insert(&serialize_id(id), bincode::serialize(user).unwrap())?;
        Ok(id)
    }

    fn get_user(&self, id: u64) -> sled::Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        Ok(users
            .get(serialize_id(id))?
            .map(|d| bincode::deserialize(&d).unwrap()))
    }

    fn first_user(&self) -> sled::Result<Option<(u64, User)>> {
        let users = self.open_tree(USERS)?;
        match users.iter().next() {
            Some(entry) => {
                let (id, data) = entry?;
                Ok(Some((
                    deserialize_id(id),
                    bincode::deserialize(&data).unwrap(),
                )))
            }
            None => Ok(None),
        }
    }

    fn update_user(&self, id: u64, user: &User) -> sled::Result<Option<()>> {
        let users = self.open_tree(USERS)?;
        overwrite_existing(&users, id, bincode::serialize(user).unwrap())
    }
}

impl MovieStore for sled::Db {
    type Error = sled::Error;

    fn create_movie(&self, movie: &Movie) -> sled::Result<u64> {
        let movies = self.open_tree(MOVIES)?;
        let id = self.generate_id()?;
        movies.insert(&serialize_id(id), bincode::serialize(movie).unwrap())?;
        Ok(id)
    }

    fn get_movie(&self, id: u64) -> sled::Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        Ok(movies
            .get(serialize_id(id))?
            .map(|d| bincode::deserialize(&d).unwrap()))
    }

    fn list_movies(&self) -> sled::Result<Vec<(u64, Movie)>> {
        let movies = self.open_tree(MOVIES)?;
        movies
            .iter()
            .map(|entry| {
                let (id, data) = entry?;
                Ok((deserialize_id(id), bincode::deserialize(&data).unwrap()))
            })
            .collect()
    }

    fn update_movie(&self, id: u64, movie: &Movie) -> sled::Result<Option<()>> {
        let movies = self.open_tree(MOVIES)?;
        overwrite_existing(&movies, id, bincode::serialize(movie).unwrap())
    }

    fn delete_movie(&self, id: u64) -> sled::Result<Option<Movie>> {
        let movies = self.open_tree(MOVIES)?;
        Ok(movies
            .remove(&serialize_id(id))?
            .map(|d| bincode::deserialize(&d).unwrap()))
    }
}

/// Replaces the row at `id` if it exists, `None` otherwise. The check and
/// the write happen in one transaction so a concurrent delete cannot
/// resurrect the row.
fn overwrite_existing(tree: &sled::Tree, id: u64, encoded: Vec<u8>) -> sled::Result<Option<()>> {
    match tree.transaction(move |tx| {
        if tx.get(&serialize_id(id))?.is_none() {
            abort(())?;
        }
        tx.insert(&serialize_id(id), encoded.clone())?;
        Ok(())
    }) {
        Ok(()) => Ok(Some(())),
        Err(TransactionError::Abort(())) => Ok(None),
        Err(TransactionError::Storage(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> sled::Db {
        let db = sled::Config::new().temporary(true).open().unwrap();
        init_schema(&db).unwrap();
        db
    }

    fn movie(title: &str, year: &str) -> Movie {
        Movie {
            title: title.to_owned(),
            year: year.to_owned(),
        }
    }

    #[test]
    fn created_movie_is_listed() {
        let db = test_db();
        let id = db.create_movie(&movie("Inception", "2010")).unwrap();
        assert_eq!(db.get_movie(id).unwrap(), Some(movie("Inception", "2010")));
        assert_eq!(db.list_movies().unwrap(), vec![(id, movie("Inception", "2010"))]);
    }

    #[test]
    fn list_is_in_id_order() {
        let db = test_db();
        let a = db.create_movie(&movie("Leon", "1994")).unwrap();
        let b = db.create_movie(&movie("Mahjong", "1996")).unwrap();
        let c = db.create_movie(&movie("WALL-E", "2008")).unwrap();
        let ids: Vec<u64> = db.list_movies().unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn update_touches_only_the_target_row() {
        let db = test_db();
        let a = db.create_movie(&movie("Leon", "1994")).unwrap();
        let b = db.create_movie(&movie("Mahjong", "1996")).unwrap();
        assert_eq!(db.update_movie(b, &movie("Mahjong", "1997")).unwrap(), Some(()));
        assert_eq!(db.get_movie(a).unwrap(), Some(movie("Leon", "1994")));
        assert_eq!(db.get_movie(b).unwrap(), Some(movie("Mahjong", "1997")));
    }

    #[test]
    fn update_of_missing_id_writes_nothing() {
        let db = test_db();
        assert_eq!(db.update_movie(42, &movie("Ghost", "1990")).unwrap(), None);
        assert!(db.list_movies().unwrap().is_empty());
    }

    #[test]
    fn delete_returns_the_removed_row_or_none() {
        let db = test_db();
        let id = db.create_movie(&movie("Leon", "1994")).unwrap();
        assert_eq!(db.delete_movie(id).unwrap(), Some(movie("Leon", "1994")));
        assert_eq!(db.delete_movie(id).unwrap(), None);
        assert!(db.list_movies().unwrap().is_empty());
    }

    #[test]
    fn first_user_is_the_lowest_id() {
        let db = test_db();
        assert_eq!(db.first_user().unwrap(), None);
        let user = User {
            name: String::new(),
            username: "admin".to_owned(),
            password_hash: "x".to_owned(),
        };
        let id = db.create_user(&user).unwrap();
        db.create_user(&User {
            username: "later".to_owned(),
            ..user.clone()
        })
        .unwrap();
        let (first_id, first) = db.first_user().unwrap().unwrap();
        assert_eq!(first_id, id);
        assert_eq!(first.username, "admin");
    }

    #[test]
    fn update_user_renames_in_place() {
        let db = test_db();
        let user = User {
            name: String::new(),
            username: "admin".to_owned(),
            password_hash: "x".to_owned(),
        };
        let id = db.create_user(&user).unwrap();
        let renamed = User {
            name: "Grey Li".to_owned(),
            ..user
        };
        assert_eq!(db.update_user(id, &renamed).unwrap(), Some(()));
        assert_eq!(db.get_user(id).unwrap().unwrap().name, "Grey Li");
        assert_eq!(db.update_user(99, &renamed).unwrap(), None);
    }

    #[test]
    fn drop_schema_discards_all_rows() {
        let db = test_db();
        db.create_movie(&movie("Leon", "1994")).unwrap();
        drop_schema(&db).unwrap();
        init_schema(&db).unwrap();
        assert!(db.list_movies().unwrap().is_empty());
    }
}
