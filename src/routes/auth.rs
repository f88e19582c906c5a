use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provisioning::Requester;

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: Uuid, // user_id
    exp: i64,  // expiration timestamp
    iat: i64,  // issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

// Verifies access tokens issued by the console's login service
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify_token(&self, token: &str) -> Result<Requester, Box<dyn std::error::Error>> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::error!("Error decoding token: {:?}", err);
            "Invalid token"
        })?;

        let claims = token_data.claims;
        Ok(Requester {
            user_id: claims.sub,
            is_admin: claims.role.as_deref() == Some(ADMIN_ROLE),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn token(secret: &str, sub: Uuid, role: Option<&str>, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub,
            exp: now + exp_offset,
            iat: now,
            role: role.map(str::to_string),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_user_token() {
        let service = AuthService::new("secret".into());
        let user = Uuid::new_v4();

        let requester = service.verify_token(&token("secret", user, None, 900)).unwrap();

        assert_eq!(requester.user_id, user);
        assert!(!requester.is_admin);
    }

    #[test]
    fn admin_role_grants_elevated_privilege() {
        let service = AuthService::new("secret".into());
        let requester = service
            .verify_token(&token("secret", Uuid::new_v4(), Some("admin"), 900))
            .unwrap();
        assert!(requester.is_admin);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let service = AuthService::new("secret".into());
        assert!(service
            .verify_token(&token("other", Uuid::new_v4(), None, 900))
            .is_err());
        assert!(service
            .verify_token(&token("secret", Uuid::new_v4(), None, -3600))
            .is_err());
    }
}
