/*!
Application users and their roles.
*/
use serde::{Deserialize, Serialize};

/// Every account is exactly one of these at any given time; a role switch
/// moves it to the other one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    /// The role a role switch lands on.
    pub fn switched(self) -> Role {
        match self {
            Role::Student => Role::Teacher,
            Role::Teacher => Role::Student,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub salt: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

/// Everything needed to insert a `User`; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub role: Role,
    pub salt: String,
    pub password_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings() {
        for role in [Role::Student, Role::Teacher] {
            let s = role.to_string();
            assert_eq!(role, s.parse::<Role>().unwrap());
        }
        assert!("Admin".parse::<Role>().is_err());
        assert!("Teacher".parse::<Role>().is_err());
    }

    #[test]
    fn switching_twice_is_identity() {
        assert_eq!(Role::Teacher, Role::Student.switched());
        assert_eq!(Role::Student, Role::Student.switched().switched());
        assert_eq!(Role::Teacher, Role::Teacher.switched().switched());
    }

    #[test]
    fn credentials_never_serialize() {
        let u = User {
            id: 1,
            email: "jo@school.not.an.address".to_owned(),
            first_name: "Jo".to_owned(),
            role: Role::Student,
            salt: "abcd".to_owned(),
            password_hash: "deadbeef".to_owned(),
        };
        let json = serde_json::to_value(&u).unwrap();
        assert_eq!(json["role"], "student");
        assert!(json.get("salt").is_none());
        assert!(json.get("password_hash").is_none());
    }
}
