// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `http_errors.rs`

#[cfg(test)]
mod tests {
    use crate::http_errors::*;

    #[test]
    fn test_map_400_bad_request() {
        let (reason, message) = map_airflow_status(400);
        assert_eq!(reason, REASON_AIRFLOW_BAD_REQUEST);
        assert!(message.contains("400"));
    }

    #[test]
    fn test_map_auth_failures() {
        for code in [401, 403] {
            let (reason, message) = map_airflow_status(code);
            assert_eq!(reason, REASON_AIRFLOW_AUTH_FAILED);
            assert!(message.contains(&code.to_string()));
        }
    }

    #[test]
    fn test_map_404_and_409() {
        assert_eq!(map_airflow_status(404).0, REASON_CONNECTION_NOT_FOUND);
        assert_eq!(map_airflow_status(409).0, REASON_CONNECTION_CONFLICT);
    }

    #[test]
    fn test_map_server_errors() {
        assert_eq!(map_airflow_status(500).0, REASON_AIRFLOW_INTERNAL_ERROR);
        for code in [502, 503, 504] {
            assert_eq!(map_airflow_status(code).0, REASON_GATEWAY_ERROR);
        }
    }

    #[test]
    fn test_map_unknown_status() {
        let (reason, message) = map_airflow_status(418);
        assert_eq!(reason, REASON_AIRFLOW_UNREACHABLE);
        assert!(message.contains("418"));
    }

    #[test]
    fn test_transport_error() {
        let (reason, message) = map_transport_error();
        assert_eq!(reason, REASON_AIRFLOW_UNREACHABLE);
        assert!(message.contains("Airflow"));
    }
}
